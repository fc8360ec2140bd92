//! RequestRouter: validates a raw request body and resolves its model.
//!
//! Routing is a pure function of the body and the static catalog. Every
//! rejection happens here, before any provider is contacted.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::catalog::descriptor::{Modality, ModelDescriptor};
use crate::catalog::registry::ModelCatalog;
use crate::error::DispatchError;
use crate::inference::types::GenerationOptions;

/// Wire form of a generation request. Every field is optional here so that
/// absence and type errors can be reported precisely.
#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    model_id: Option<String>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    options: Option<GenerationOptions>,
}

/// A validated request, immutable from here on.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub task: Modality,
    pub prompt: String,
    pub descriptor: Arc<ModelDescriptor>,
    /// `stream` as the caller sent it.
    pub requested_stream: bool,
    /// Whether the response will actually stream.
    pub stream: bool,
    pub options: GenerationOptions,
}

impl InferenceRequest {
    pub fn model_id(&self) -> &str {
        &self.descriptor.id
    }

    /// True when streaming was asked for but the model cannot stream.
    pub fn downgraded(&self) -> bool {
        self.requested_stream && !self.stream
    }
}

#[derive(Debug, Clone)]
pub struct RequestRouter {
    catalog: Arc<ModelCatalog>,
}

impl RequestRouter {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self { catalog }
    }

    pub fn route(&self, body: &[u8]) -> Result<InferenceRequest, DispatchError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| DispatchError::InvalidRequest(format!("body is not valid JSON: {e}")))?;
        if !value.is_object() {
            return Err(DispatchError::InvalidRequest(
                "body must be a JSON object".to_string(),
            ));
        }
        let raw: RawRequest = serde_json::from_value(value)
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        let task = match raw.task.as_deref() {
            None => return Err(DispatchError::InvalidRequest("missing field `task`".into())),
            Some(task) => Modality::parse(task).ok_or_else(|| {
                DispatchError::InvalidRequest(format!(
                    "unrecognized task {task:?}, expected \"text\" or \"image\""
                ))
            })?,
        };

        let prompt = raw.prompt.unwrap_or_default();
        if prompt.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "`prompt` must be a non-empty string".into(),
            ));
        }

        let options = raw.options.unwrap_or_default();
        validate_options(&options)?;

        let descriptor = match raw.model_id {
            None => self.catalog.default_for(task),
            Some(id) => {
                let descriptor = self
                    .catalog
                    .lookup(&id)
                    .ok_or(DispatchError::ModelNotFound(id))?;
                if descriptor.modality != task {
                    return Err(DispatchError::InvalidRequest(format!(
                        "model {} generates {} but the task is {task}",
                        descriptor.id, descriptor.modality
                    )));
                }
                descriptor
            }
        };

        let requested_stream = raw.stream.unwrap_or(false);
        let stream = requested_stream && descriptor.supports_streaming;

        Ok(InferenceRequest {
            task,
            prompt,
            descriptor,
            requested_stream,
            stream,
            options,
        })
    }
}

fn validate_options(options: &GenerationOptions) -> Result<(), DispatchError> {
    for (name, value) in [
        ("max_tokens", options.max_tokens),
        ("width", options.width),
        ("height", options.height),
    ] {
        if value == Some(0) {
            return Err(DispatchError::InvalidRequest(format!(
                "option `{name}` must be a positive integer"
            )));
        }
    }
    if let Some(t) = options.temperature {
        if !t.is_finite() || t < 0.0 {
            return Err(DispatchError::InvalidRequest(
                "option `temperature` must be a non-negative number".into(),
            ));
        }
    }
    Ok(())
}
