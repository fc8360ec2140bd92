//! ResponseFormatter: renders model output into a self-contained HTML document.
//!
//! The streaming document is the same document cut into three parts: the head
//! written when the response opens, the escaped text deltas, and the tail
//! carried by the final chunk. On success a streamed body is byte-identical to
//! the non-streamed one for the same text.

use base64::Engine;

use crate::catalog::descriptor::Modality;
use crate::error::DispatchError;
use crate::inference::types::{ModelContent, ModelResponse};

const STYLE: &str = "body{font-family:'Segoe UI',Tahoma,Geneva,Verdana,sans-serif;line-height:1.6;color:#333;max-width:800px;margin:0 auto;padding:20px;background-color:#f9f9f9}\
h1{color:#2c3e50;border-bottom:2px solid #3498db;padding-bottom:10px}\
.content{background-color:#fff;padding:20px;border-radius:5px}\
img{max-width:100%;border-radius:5px}\
.stream-error{color:#e74c3c;font-weight:bold}";

const TAIL: &str = "\n</div>\n</body>\n</html>\n";

/// Escape text for embedding in element content; newlines become `<br>`.
///
/// Works character by character, so escaping deltas one at a time yields the
/// same output as escaping their concatenation.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("<br>"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

fn head(title: &str, heading: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <h1>{heading}</h1>\n<div class=\"content\">\n"
    )
}

/// Renders final or buffered model output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseFormatter;

impl ResponseFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Render a complete document for `response`.
    pub fn format(&self, response: &ModelResponse, task: Modality) -> Result<String, DispatchError> {
        match (&response.content, task) {
            (ModelContent::Text(text), Modality::Text) => self.format_text(text),
            (ModelContent::Image(bytes), Modality::Image) => self.format_image(bytes),
            (content, task) => Err(DispatchError::FormattingError(format!(
                "{task} task produced {} output",
                match content {
                    ModelContent::Text(_) => "text",
                    ModelContent::Image(_) => "image",
                }
            ))),
        }
    }

    fn format_text(&self, text: &str) -> Result<String, DispatchError> {
        if text.trim().is_empty() {
            return Err(DispatchError::FormattingError(
                "model returned no text".to_string(),
            ));
        }
        let mut doc = self.stream_head();
        doc.push_str(&escape_text(text));
        doc.push_str(TAIL);
        Ok(doc)
    }

    fn format_image(&self, bytes: &[u8]) -> Result<String, DispatchError> {
        if bytes.is_empty() {
            return Err(DispatchError::FormattingError(
                "model returned an empty image".to_string(),
            ));
        }
        let mime = infer::get(bytes)
            .map(|kind| kind.mime_type())
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or("image/png");
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

        let mut doc = head("AI Generated Image", "AI Generated Image");
        doc.push_str(&format!(
            "<img src=\"data:{mime};base64,{encoded}\" alt=\"AI generated image\">"
        ));
        doc.push_str(TAIL);
        Ok(doc)
    }

    /// Opening fragment of a streamed text document.
    pub fn stream_head(&self) -> String {
        head("AI Generated Content", "AI Generated Response")
    }

    /// Closing fragment of a streamed text document.
    pub fn stream_tail(&self) -> &'static str {
        TAIL
    }

    /// Inline error marker followed by the closing fragment.
    pub fn stream_error(&self, error: &DispatchError) -> String {
        format!(
            "\n<p class=\"stream-error\" data-error-kind=\"{}\">[generation interrupted: {}]</p>{TAIL}",
            error.kind().as_str(),
            escape_text(&error.to_string()),
        )
    }
}
