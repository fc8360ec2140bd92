//! Provider transport contract.
//!
//! A [`ProviderClient`] moves opaque JSON bodies to one upstream backend and
//! reports failures as [`ProviderError`] signals. Request/response shapes are
//! the business of the invocation strategies, not of the transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::catalog::descriptor::Provider;
use crate::error::DispatchError;

/// Failure signal raised by a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("throttled: {0}")]
    Throttled(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("model not found upstream: {0}")]
    ModelNotFound(String),

    #[error("provider failure: {0}")]
    Failure(String),

    #[error("malformed provider payload: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, ProviderError::Throttled(_))
    }
}

impl From<ProviderError> for DispatchError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Throttled(_) => DispatchError::ProviderThrottled(e.to_string()),
            ProviderError::Malformed(_) => DispatchError::FormattingError(e.to_string()),
            ProviderError::AccessDenied(_)
            | ProviderError::ModelNotFound(_)
            | ProviderError::Failure(_) => DispatchError::ProviderUnavailable(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else {
            ProviderError::Failure(e.to_string())
        }
    }
}

/// Raw provider events of a streaming call, in arrival order.
pub type EventStream = BoxStream<'static, Result<Value, ProviderError>>;

/// Long-lived, shareable client for one provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Single request/response call.
    async fn generate(&self, model_id: &str, body: Value) -> Result<Value, ProviderError>;

    /// Open a streaming call. Errors before the first event are returned
    /// directly; later ones arrive as stream items.
    async fn generate_stream(&self, model_id: &str, body: Value) -> Result<EventStream, ProviderError>;
}

fn extract_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<Value>(body).ok()?;
    json.get("message")
        .or_else(|| json.get("Message"))
        .and_then(Value::as_str)
        .or_else(|| json.get("error").and_then(Value::as_str))
        .or_else(|| {
            json.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Map a non-success HTTP status and body onto a provider signal.
pub fn classify_http_error(status: u16, body: &str) -> ProviderError {
    let detail = extract_message(body).or_else(|| {
        let trimmed = body.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let message = detail.clone().unwrap_or_else(|| format!("HTTP {status}"));
    let lower = body.to_lowercase();

    if status == 429 || lower.contains("throttl") || lower.contains("too many requests") {
        return ProviderError::Throttled(message);
    }
    match status {
        401 | 403 => ProviderError::AccessDenied(message),
        404 => ProviderError::ModelNotFound(message),
        _ => match detail {
            Some(detail) => ProviderError::Failure(format!("HTTP {status}: {detail}")),
            None => ProviderError::Failure(format!("HTTP {status}")),
        },
    }
}

/// Shared HTTP client for provider transports.
pub fn http_client(connect_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}
