//! Model descriptors: what a model id means to the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Generation modality. Doubles as the request's `task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Modality::Text),
            "image" => Some(Modality::Image),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream backend family. Each provider has one transport client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Bedrock,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Bedrock => "bedrock",
            Provider::Ollama => "ollama",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response body shape understood by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSchema {
    /// Amazon Titan text (`inputText` / `results[].outputText`).
    TitanText,
    /// Amazon Nova messages-v1.
    Nova,
    /// Mistral instruct (`prompt` / `outputs[].text`).
    Mistral,
    /// Meta Llama 3 instruct (`prompt` / `generation`).
    Llama3,
    /// Anthropic messages API as hosted on Bedrock.
    AnthropicMessages,
    /// Amazon Titan image generator.
    TitanImage,
    /// Stability AI SDXL.
    StabilityImage,
    /// Ollama `/api/generate`.
    OllamaGenerate,
}

impl ModelSchema {
    pub fn provider(&self) -> Provider {
        match self {
            ModelSchema::OllamaGenerate => Provider::Ollama,
            _ => Provider::Bedrock,
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            ModelSchema::TitanImage | ModelSchema::StabilityImage => Modality::Image,
            _ => Modality::Text,
        }
    }

    /// Coarse model family, recorded for cost attribution.
    pub fn family(&self) -> &'static str {
        match self {
            ModelSchema::TitanText | ModelSchema::TitanImage => "titan",
            ModelSchema::Nova => "nova",
            ModelSchema::Mistral => "mistral",
            ModelSchema::Llama3 => "llama",
            ModelSchema::AnthropicMessages => "claude",
            ModelSchema::StabilityImage => "stability",
            ModelSchema::OllamaGenerate => "ollama",
        }
    }
}

/// Catalog entry describing a model's provider, modality, and streaming capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: Provider,
    pub modality: Modality,
    pub schema: ModelSchema,
    #[serde(default)]
    pub supports_streaming: bool,
}

impl ModelDescriptor {
    pub fn new(id: &str, schema: ModelSchema, supports_streaming: bool) -> Self {
        Self {
            id: id.to_string(),
            provider: schema.provider(),
            modality: schema.modality(),
            schema,
            supports_streaming,
        }
    }
}
