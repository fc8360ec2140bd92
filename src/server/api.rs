//! HTTP API.
//!
//! - POST /generate (also POST /)
//! - GET /v1/models
//! - GET /health
//! - GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::Registry;
use serde::Serialize;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::descriptor::{Modality, Provider};
use crate::catalog::registry::ModelCatalog;
use crate::config::ServerConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::DispatchError;
use crate::observability::metrics;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Application state shared across handlers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub catalog: Arc<ModelCatalog>,
    pub registry: Registry,
    pub start_time: Instant,
    /// Generation slots. A streamed response holds its permit until the body
    /// is dropped.
    pub permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        catalog: Arc<ModelCatalog>,
        registry: Registry,
        config: &ServerConfig,
    ) -> Self {
        Self {
            dispatcher,
            catalog,
            registry,
            start_time: Instant::now(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let router = Router::new()
        .route("/generate", post(generate))
        .route("/", post(generate))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http());

    let router = if config.allow_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(state)
}

// ─── Response Types ────────────────────────────────────────────────────────

/// Model listing response.
#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub provider: Provider,
    pub modality: Modality,
    pub family: &'static str,
    pub supports_streaming: bool,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub models: usize,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn generate(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let request_id_header = HeaderValue::from_str(&request_id).ok();

    let permit = state.permits.clone().acquire_owned().await.ok();
    let started = Instant::now();

    let outcome = match (&permit, body) {
        (None, _) => Err(state.dispatcher.reject(
            &request_id,
            DispatchError::ProviderUnavailable("generation slots are closed".to_string()),
        )),
        (Some(_), Ok(body)) => state.dispatcher.dispatch(&body, &request_id).await,
        (Some(_), Err(rejection)) => Err(state.dispatcher.reject(
            &request_id,
            DispatchError::InvalidRequest(format!(
                "cannot read request body: {}",
                rejection.body_text()
            )),
        )),
    };

    let mut response = match outcome {
        Ok(DispatchOutcome::Document(html)) => {
            info!(
                request_id,
                bytes = html.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Document rendered"
            );
            ([(CONTENT_TYPE, HTML_CONTENT_TYPE)], html).into_response()
        }
        Ok(DispatchOutcome::Stream(stream)) => {
            info!(
                request_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Streaming response opened"
            );
            (
                [(CONTENT_TYPE, HTML_CONTENT_TYPE), (CACHE_CONTROL, "no-cache")],
                stream.into_body_holding(permit),
            )
                .into_response()
        }
        Err(e) => {
            warn!(
                request_id,
                kind = %e.kind(),
                status = e.status_code().as_u16(),
                error = %e,
                "Request failed"
            );
            e.into_response_with_id(&request_id)
        }
    };

    if let Some(value) = request_id_header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(ModelList {
        object: "list",
        data: state
            .catalog
            .iter()
            .map(|d| ModelInfo {
                id: d.id.clone(),
                object: "model",
                provider: d.provider,
                modality: d.modality,
                family: d.schema.family(),
                supports_streaming: d.supports_streaming,
            })
            .collect(),
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        models: state.catalog.len(),
    })
}

async fn metrics_text(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(&state.registry),
    )
}
