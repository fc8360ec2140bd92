//! Capability-indexed dispatch table.
//!
//! `(provider, modality)` selects an [`InvocationStrategy`]: plain functions
//! that build the provider request body, read a complete response, and read
//! one streaming event. Supporting a new provider means adding a transport
//! client and a table entry.

use std::collections::HashMap;

use base64::Engine;
use serde_json::{json, Map, Value};

use crate::catalog::descriptor::{Modality, ModelDescriptor, ModelSchema, Provider};
use crate::inference::provider::ProviderError;
use crate::inference::types::{GenerationOptions, ModelContent};

const NOVA_SYSTEM_PROMPT: &str =
    "Act as a subject matter expert. When the user provides you with a topic, explain about that topic.";

/// Content and usage read from a complete provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub content: ModelContent,
    pub token_count: Option<u64>,
}

/// What one streaming event contributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPiece {
    pub text: Option<String>,
    pub token_count: Option<u64>,
}

pub type BuildBody = fn(&ModelDescriptor, &str, &GenerationOptions, bool) -> Value;
pub type ParseResponse = fn(&ModelDescriptor, &Value) -> Result<ParsedResponse, ProviderError>;
pub type ParseEvent = fn(&ModelDescriptor, &Value) -> EventPiece;

/// How to talk to one provider for one modality.
#[derive(Clone, Copy)]
pub struct InvocationStrategy {
    pub build_body: BuildBody,
    pub parse_response: ParseResponse,
    /// `None` when the pair has no incremental variant.
    pub parse_event: Option<ParseEvent>,
}

#[derive(Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<(Provider, Modality), InvocationStrategy>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every shipped strategy.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(
            Provider::Bedrock,
            Modality::Text,
            InvocationStrategy {
                build_body: bedrock_text_body,
                parse_response: bedrock_text_response,
                parse_event: Some(bedrock_text_event),
            },
        );
        table.register(
            Provider::Bedrock,
            Modality::Image,
            InvocationStrategy {
                build_body: bedrock_image_body,
                parse_response: bedrock_image_response,
                parse_event: None,
            },
        );
        table.register(
            Provider::Ollama,
            Modality::Text,
            InvocationStrategy {
                build_body: ollama_body,
                parse_response: ollama_response,
                parse_event: Some(ollama_event),
            },
        );
        table
    }

    pub fn register(&mut self, provider: Provider, modality: Modality, strategy: InvocationStrategy) {
        self.entries.insert((provider, modality), strategy);
    }

    pub fn get(&self, provider: Provider, modality: Modality) -> Option<&InvocationStrategy> {
        self.entries.get(&(provider, modality))
    }
}

fn text_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn u64_at(value: &Value, pointer: &str) -> Option<u64> {
    value.pointer(pointer).and_then(Value::as_u64)
}

fn missing(descriptor: &ModelDescriptor, what: &str) -> ProviderError {
    ProviderError::Malformed(format!("{} response has no {what}", descriptor.id))
}

// ─── Bedrock text ──────────────────────────────────────────────────────────

fn bedrock_text_body(
    descriptor: &ModelDescriptor,
    prompt: &str,
    options: &GenerationOptions,
    _streaming: bool,
) -> Value {
    let max_tokens = |default: u32| options.max_tokens.unwrap_or(default);
    let temperature = |default: f64| options.temperature.unwrap_or(default);

    match descriptor.schema {
        ModelSchema::Nova => json!({
            "schemaVersion": "messages-v1",
            "system": [{ "text": NOVA_SYSTEM_PROMPT }],
            "messages": [{ "role": "user", "content": [{ "text": prompt }] }],
            "inferenceConfig": {
                "maxTokens": max_tokens(500),
                "topP": 0.9,
                "topK": 20,
                "temperature": temperature(0.7),
            },
        }),
        ModelSchema::Mistral => json!({
            "prompt": format!("<s>[INST] {prompt} [/INST]"),
            "max_tokens": max_tokens(400),
            "temperature": temperature(0.7),
            "top_p": 0.7,
            "top_k": 50,
        }),
        ModelSchema::Llama3 => json!({
            "prompt": format!(
                "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|>\
                 <|start_header_id|>assistant<|end_header_id|>\n\n"
            ),
            "max_gen_len": max_tokens(512),
            "temperature": temperature(0.5),
        }),
        ModelSchema::AnthropicMessages => json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": max_tokens(300),
            "temperature": temperature(0.1),
            "top_p": 0.9,
            "messages": [{ "role": "user", "content": [{ "type": "text", "text": prompt }] }],
        }),
        // Titan text is the Bedrock fallback shape.
        _ => json!({
            "inputText": prompt,
            "textGenerationConfig": {
                "maxTokenCount": max_tokens(512),
                "temperature": temperature(0.5),
            },
        }),
    }
}

fn bedrock_text_response(
    descriptor: &ModelDescriptor,
    raw: &Value,
) -> Result<ParsedResponse, ProviderError> {
    let (text, token_count) = match descriptor.schema {
        ModelSchema::Nova => (
            text_at(raw, "/output/message/content/0/text").map(str::to_string),
            u64_at(raw, "/usage/outputTokens"),
        ),
        ModelSchema::Mistral => (
            text_at(raw, "/outputs/0/text").map(str::to_string),
            None,
        ),
        ModelSchema::Llama3 => (
            text_at(raw, "/generation").map(str::to_string),
            u64_at(raw, "/generation_token_count"),
        ),
        ModelSchema::AnthropicMessages => {
            let text = raw.get("content").and_then(Value::as_array).map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<String>()
            });
            (text, u64_at(raw, "/usage/output_tokens"))
        }
        _ => (
            text_at(raw, "/results/0/outputText")
                .or_else(|| text_at(raw, "/outputText"))
                .map(str::to_string),
            u64_at(raw, "/results/0/tokenCount"),
        ),
    };

    let text = text.ok_or_else(|| missing(descriptor, "generated text"))?;
    Ok(ParsedResponse {
        content: ModelContent::Text(text),
        token_count,
    })
}

fn bedrock_text_event(descriptor: &ModelDescriptor, event: &Value) -> EventPiece {
    let text = match descriptor.schema {
        ModelSchema::Nova => text_at(event, "/contentBlockDelta/delta/text"),
        ModelSchema::Mistral => text_at(event, "/outputs/0/text"),
        ModelSchema::Llama3 => text_at(event, "/generation"),
        ModelSchema::AnthropicMessages => {
            if event.get("type").and_then(Value::as_str) == Some("content_block_delta") {
                text_at(event, "/delta/text")
            } else {
                None
            }
        }
        _ => text_at(event, "/outputText"),
    };

    // Bedrock appends invocation metrics to the last event of every model.
    let token_count = u64_at(event, "/amazon-bedrock-invocationMetrics/outputTokenCount")
        .or_else(|| u64_at(event, "/metadata/usage/outputTokens"))
        .or_else(|| u64_at(event, "/usage/output_tokens"));

    EventPiece {
        text: text.map(str::to_string),
        token_count,
    }
}

// ─── Bedrock image ─────────────────────────────────────────────────────────

fn bedrock_image_body(
    descriptor: &ModelDescriptor,
    prompt: &str,
    options: &GenerationOptions,
    _streaming: bool,
) -> Value {
    match descriptor.schema {
        ModelSchema::StabilityImage => json!({
            "text_prompts": [{ "text": prompt }],
            "width": options.width.unwrap_or(1024),
            "height": options.height.unwrap_or(1024),
        }),
        _ => json!({
            "taskType": "TEXT_IMAGE",
            "textToImageParams": { "text": prompt },
            "imageGenerationConfig": {
                "numberOfImages": 1,
                "width": options.width.unwrap_or(512),
                "height": options.height.unwrap_or(512),
            },
        }),
    }
}

fn bedrock_image_response(
    descriptor: &ModelDescriptor,
    raw: &Value,
) -> Result<ParsedResponse, ProviderError> {
    let encoded = match descriptor.schema {
        ModelSchema::StabilityImage => {
            if let Some(reason) = text_at(raw, "/artifacts/0/finishReason") {
                if reason != "SUCCESS" {
                    return Err(ProviderError::Failure(format!(
                        "image generation finished with {reason}"
                    )));
                }
            }
            text_at(raw, "/artifacts/0/base64")
        }
        _ => {
            if let Some(error) = raw.get("error").and_then(Value::as_str) {
                return Err(ProviderError::Failure(error.to_string()));
            }
            text_at(raw, "/images/0")
        }
    };

    let encoded = encoded.ok_or_else(|| missing(descriptor, "image"))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ProviderError::Malformed(format!("image is not valid base64: {e}")))?;
    Ok(ParsedResponse {
        content: ModelContent::Image(bytes),
        token_count: None,
    })
}

// ─── Ollama ────────────────────────────────────────────────────────────────

fn ollama_body(
    descriptor: &ModelDescriptor,
    prompt: &str,
    options: &GenerationOptions,
    streaming: bool,
) -> Value {
    let mut model_options: Map<String, Value> = options.extra.clone();
    if let Some(max_tokens) = options.max_tokens {
        model_options.insert("num_predict".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = options.temperature {
        model_options.insert("temperature".to_string(), json!(temperature));
    }

    json!({
        "model": descriptor.id,
        "prompt": prompt,
        "stream": streaming,
        "options": model_options,
    })
}

fn ollama_response(
    descriptor: &ModelDescriptor,
    raw: &Value,
) -> Result<ParsedResponse, ProviderError> {
    let text = text_at(raw, "/response").ok_or_else(|| missing(descriptor, "response"))?;
    Ok(ParsedResponse {
        content: ModelContent::Text(text.to_string()),
        token_count: u64_at(raw, "/eval_count"),
    })
}

fn ollama_event(_descriptor: &ModelDescriptor, event: &Value) -> EventPiece {
    let done = event.get("done").and_then(Value::as_bool).unwrap_or(false);
    EventPiece {
        text: text_at(event, "/response").map(str::to_string),
        token_count: if done { u64_at(event, "/eval_count") } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, schema: ModelSchema) -> ModelDescriptor {
        ModelDescriptor::new(id, schema, schema.modality() == Modality::Text)
    }

    #[test]
    fn test_standard_table_entries() {
        let table = DispatchTable::standard();
        assert!(table.get(Provider::Bedrock, Modality::Text).unwrap().parse_event.is_some());
        assert!(table.get(Provider::Bedrock, Modality::Image).unwrap().parse_event.is_none());
        assert!(table.get(Provider::Ollama, Modality::Text).is_some());
        assert!(table.get(Provider::Ollama, Modality::Image).is_none());
    }

    #[test]
    fn test_text_bodies_follow_schema() {
        let options = GenerationOptions {
            max_tokens: Some(42),
            ..Default::default()
        };

        let titan = bedrock_text_body(
            &descriptor("amazon.titan-text-express-v1", ModelSchema::TitanText),
            "hi",
            &options,
            false,
        );
        assert_eq!(titan["inputText"], "hi");
        assert_eq!(titan["textGenerationConfig"]["maxTokenCount"], 42);

        let nova = bedrock_text_body(
            &descriptor("amazon.nova-micro-v1:0", ModelSchema::Nova),
            "hi",
            &GenerationOptions::default(),
            false,
        );
        assert_eq!(nova["schemaVersion"], "messages-v1");
        assert_eq!(nova["messages"][0]["content"][0]["text"], "hi");
        assert_eq!(nova["inferenceConfig"]["maxTokens"], 500);

        let mistral = bedrock_text_body(
            &descriptor("mistral.mistral-7b-instruct-v0:2", ModelSchema::Mistral),
            "hi",
            &options,
            true,
        );
        assert_eq!(mistral["prompt"], "<s>[INST] hi [/INST]");
        assert_eq!(mistral["max_tokens"], 42);

        let claude = bedrock_text_body(
            &descriptor("claude", ModelSchema::AnthropicMessages),
            "hi",
            &GenerationOptions::default(),
            false,
        );
        assert_eq!(claude["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(claude["max_tokens"], 300);
    }

    #[test]
    fn test_text_responses() {
        let titan = descriptor("t", ModelSchema::TitanText);
        let parsed = bedrock_text_response(
            &titan,
            &json!({ "results": [{ "outputText": "cloud", "tokenCount": 3 }] }),
        )
        .unwrap();
        assert_eq!(parsed.content, ModelContent::Text("cloud".into()));
        assert_eq!(parsed.token_count, Some(3));

        let claude = descriptor("c", ModelSchema::AnthropicMessages);
        let parsed = bedrock_text_response(
            &claude,
            &json!({
                "content": [{ "type": "text", "text": "a" }, { "type": "text", "text": "b" }],
                "usage": { "output_tokens": 2 }
            }),
        )
        .unwrap();
        assert_eq!(parsed.content, ModelContent::Text("ab".into()));

        let err = bedrock_text_response(&titan, &json!({ "unexpected": true })).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn test_text_events() {
        let claude = descriptor("c", ModelSchema::AnthropicMessages);
        let piece = bedrock_text_event(
            &claude,
            &json!({ "type": "content_block_delta", "delta": { "type": "text_delta", "text": "Hel" } }),
        );
        assert_eq!(piece.text.as_deref(), Some("Hel"));
        assert!(bedrock_text_event(&claude, &json!({ "type": "message_start" })).text.is_none());

        let titan = descriptor("t", ModelSchema::TitanText);
        let piece = bedrock_text_event(
            &titan,
            &json!({
                "outputText": "end",
                "amazon-bedrock-invocationMetrics": { "outputTokenCount": 9 }
            }),
        );
        assert_eq!(piece.text.as_deref(), Some("end"));
        assert_eq!(piece.token_count, Some(9));
    }

    #[test]
    fn test_image_response_decodes_base64() {
        let titan = descriptor("i", ModelSchema::TitanImage);
        let parsed = bedrock_image_response(&titan, &json!({ "images": ["AQID"] })).unwrap();
        assert_eq!(parsed.content, ModelContent::Image(vec![1, 2, 3]));

        let err = bedrock_image_response(&titan, &json!({ "images": ["***"] })).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));

        let sdxl = descriptor("s", ModelSchema::StabilityImage);
        let err = bedrock_image_response(
            &sdxl,
            &json!({ "artifacts": [{ "base64": "AQID", "finishReason": "CONTENT_FILTERED" }] }),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Failure(_)));
    }

    #[test]
    fn test_image_body_dimensions() {
        let options = GenerationOptions {
            width: Some(768),
            height: Some(640),
            ..Default::default()
        };
        let body = bedrock_image_body(&descriptor("i", ModelSchema::TitanImage), "cat", &options, false);
        assert_eq!(body["imageGenerationConfig"]["width"], 768);
        assert_eq!(body["imageGenerationConfig"]["height"], 640);
        assert_eq!(body["textToImageParams"]["text"], "cat");
    }

    #[test]
    fn test_ollama_shapes() {
        let model = descriptor("llama3.2", ModelSchema::OllamaGenerate);
        let mut options = GenerationOptions {
            max_tokens: Some(16),
            ..Default::default()
        };
        options.extra.insert("top_k".into(), json!(5));

        let body = ollama_body(&model, "hi", &options, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"]["num_predict"], 16);
        assert_eq!(body["options"]["top_k"], 5);

        let piece = ollama_event(&model, &json!({ "response": "", "done": true, "eval_count": 4 }));
        assert_eq!(piece.token_count, Some(4));
    }
}
