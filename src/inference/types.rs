//! Values exchanged between the gateway and its consumers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DispatchError;

/// Generation knobs accepted in the request's `options` object.
///
/// Keys beyond the typed ones are kept in `extra` and passed through to
/// providers that understand them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Generated payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelContent {
    Text(String),
    Image(Vec<u8>),
}

impl ModelContent {
    /// Length in bytes of the payload.
    pub fn len(&self) -> usize {
        match self {
            ModelContent::Text(t) => t.len(),
            ModelContent::Image(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMetadata {
    /// Output tokens as reported by the provider, if it reports them.
    pub token_count: Option<u64>,
    pub latency_ms: u64,
}

/// A complete (buffered) model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: ModelContent,
    pub metadata: ResponseMetadata,
}

/// One event on the per-request delta channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEvent {
    /// A piece of generated text.
    Delta(String),
    /// The provider finished normally.
    Done { token_count: Option<u64> },
    /// The provider failed after the stream was handed out.
    Failed(DispatchError),
}

/// Rough token estimate for text whose provider reports no usage.
///
/// Counts word runs and scales by 1.3; JSON-looking text gets a further 1.2.
pub fn estimate_tokens(text: &str) -> u64 {
    let words = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .count();
    if words == 0 {
        return 0;
    }

    let mut estimate = ((words as f64 * 1.3) as u64).max(1);
    if text.contains('{') && text.contains('}') {
        estimate = (estimate as f64 * 1.2) as u64;
    }
    estimate
}
