//! Shared fixtures: a scripted in-process provider and an app builder.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use futures::stream::{self, StreamExt};
use prometheus::Registry;
use serde_json::{json, Value};
use tower::ServiceExt;

use html_inference_dispatcher::catalog::descriptor::Provider;
use html_inference_dispatcher::catalog::registry::ModelCatalog;
use html_inference_dispatcher::config::Config;
use html_inference_dispatcher::dispatch::router::RequestRouter;
use html_inference_dispatcher::dispatch::Dispatcher;
use html_inference_dispatcher::inference::gateway::{GatewayPolicy, ModelGateway};
use html_inference_dispatcher::inference::provider::{EventStream, ProviderClient, ProviderError};
use html_inference_dispatcher::inference::strategy::DispatchTable;
use html_inference_dispatcher::observability::hook::SharedHook;
use html_inference_dispatcher::server::api::{build_router, AppState};

/// One scripted answer, consumed per provider call.
pub enum Reply {
    Json(Value),
    Fail(ProviderError),
    Events(Vec<Result<Value, ProviderError>>),
    /// Events, then an upstream that never finishes.
    Stalled(Vec<Result<Value, ProviderError>>),
}

/// Provider that replays a fixed script and counts calls.
pub struct ScriptedProvider {
    provider: Provider,
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

impl ScriptedProvider {
    pub fn bedrock(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            provider: Provider::Bedrock,
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Request bodies received so far.
    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }

    fn next(&self, body: Value) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(body);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Fail(ProviderError::Failure("script exhausted".into())))
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn generate(&self, _model_id: &str, body: Value) -> Result<Value, ProviderError> {
        match self.next(body) {
            Reply::Json(value) => Ok(value),
            Reply::Fail(e) => Err(e),
            Reply::Events(_) | Reply::Stalled(_) => {
                Err(ProviderError::Failure("stream reply for invoke".into()))
            }
        }
    }

    async fn generate_stream(&self, _model_id: &str, body: Value) -> Result<EventStream, ProviderError> {
        match self.next(body) {
            Reply::Events(events) => Ok(stream::iter(events).boxed()),
            Reply::Stalled(events) => Ok(stream::iter(events).chain(stream::pending()).boxed()),
            Reply::Fail(e) => Err(e),
            Reply::Json(_) => Err(ProviderError::Failure("invoke reply for stream".into())),
        }
    }
}

/// Titan text response with `text`.
pub fn titan_text(text: &str) -> Value {
    json!({ "inputTextTokenCount": 3, "results": [{ "tokenCount": 7, "outputText": text, "completionReason": "FINISH" }] })
}

/// Titan streaming event carrying one delta.
pub fn titan_delta(text: &str) -> Result<Value, ProviderError> {
    Ok(json!({ "outputText": text, "index": 0 }))
}

pub fn test_policy() -> GatewayPolicy {
    GatewayPolicy {
        call_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(5),
        channel_capacity: 8,
    }
}

/// Router wired to `provider` with `hook` observing every stage.
pub fn app(provider: Arc<ScriptedProvider>, hook: SharedHook, registry: Registry) -> Router {
    app_with(provider, hook, registry, Config::default())
}

/// Like [`app`], with server limits taken from `config`.
pub fn app_with(
    provider: Arc<ScriptedProvider>,
    hook: SharedHook,
    registry: Registry,
    config: Config,
) -> Router {
    let catalog = Arc::new(ModelCatalog::from_config(&config.catalog).unwrap());
    let gateway = ModelGateway::new(test_policy(), DispatchTable::standard()).with_client(provider);
    let dispatcher = Dispatcher::new(RequestRouter::new(catalog.clone()), gateway, hook);
    let state = Arc::new(AppState::new(dispatcher, catalog, registry, &config.server));
    build_router(state, &config.server)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub frames: Vec<String>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        self.frames.concat()
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text()).unwrap()
    }

    pub fn request_id(&self) -> &str {
        self.headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

pub async fn send(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();

    let mut frames = Vec::new();
    let mut data = response.into_body().into_data_stream();
    while let Some(frame) = data.next().await {
        frames.push(String::from_utf8(frame.unwrap().to_vec()).unwrap());
    }
    TestResponse {
        status,
        headers,
        frames,
    }
}

pub fn generate_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn post_generate(app: Router, body: &str) -> TestResponse {
    send(app, generate_request(body)).await
}

pub async fn get(app: Router, uri: &str) -> TestResponse {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}
