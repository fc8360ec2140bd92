//! Dispatcher error taxonomy.
//!
//! Every failure a caller can observe maps to exactly one [`ErrorKind`]. Errors
//! raised before a response has begun become an HTTP status plus a JSON body;
//! `StreamInterrupted` only ever travels inside a terminal stream chunk.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Stable error classification exposed as the `kind` field of error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    ModelNotFound,
    ProviderThrottled,
    ProviderUnavailable,
    StreamInterrupted,
    FormattingError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::ModelNotFound => "ModelNotFound",
            ErrorKind::ProviderThrottled => "ProviderThrottled",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::StreamInterrupted => "StreamInterrupted",
            ErrorKind::FormattingError => "FormattingError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown model: {0}")]
    ModelNotFound(String),

    #[error("provider throttled the request: {0}")]
    ProviderThrottled(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("cannot format model output: {0}")]
    FormattingError(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DispatchError::ModelNotFound(_) => ErrorKind::ModelNotFound,
            DispatchError::ProviderThrottled(_) => ErrorKind::ProviderThrottled,
            DispatchError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            DispatchError::StreamInterrupted(_) => ErrorKind::StreamInterrupted,
            DispatchError::FormattingError(_) => ErrorKind::FormattingError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidRequest | ErrorKind::ModelNotFound => StatusCode::BAD_REQUEST,
            ErrorKind::ProviderThrottled => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            // Only reachable if a stream fails before its response started.
            ErrorKind::StreamInterrupted => StatusCode::BAD_GATEWAY,
            ErrorKind::FormattingError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the JSON error response, tagged with the request id.
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind().as_str(),
            request_id: request_id.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    pub request_id: String,
}
