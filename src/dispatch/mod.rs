//! Request dispatch: router → gateway → stream encoder or formatter.
//!
//! - [`router`]: request validation and model selection

pub mod router;

use std::sync::Arc;

use tracing::info;

use crate::error::DispatchError;
use crate::inference::gateway::{Invocation, ModelGateway};
use crate::inference::types::estimate_tokens;
use crate::observability::hook::{finish, SharedHook};
use crate::render::html::ResponseFormatter;
use crate::server::streaming::{HtmlStream, StreamEncoder};

use self::router::RequestRouter;

/// What a successful dispatch produces.
pub enum DispatchOutcome {
    /// A complete HTML document.
    Document(String),
    /// A streamed HTML document.
    Stream(HtmlStream),
}

/// Composes the stages for one request. Shared by all requests; holds no
/// per-request state.
pub struct Dispatcher {
    router: RequestRouter,
    gateway: ModelGateway,
    formatter: ResponseFormatter,
    hook: SharedHook,
}

impl Dispatcher {
    pub fn new(router: RequestRouter, gateway: ModelGateway, hook: SharedHook) -> Self {
        Self {
            router,
            gateway,
            formatter: ResponseFormatter::new(),
            hook,
        }
    }

    pub async fn dispatch(
        &self,
        body: &[u8],
        request_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut span = self.hook.start("router");
        span.set_attribute("request_id", request_id.into());
        let routed = self.router.route(body);
        if let Ok(request) = &routed {
            span.set_attribute("task", request.task.as_str().into());
            span.set_attribute("model_id", request.model_id().into());
            span.set_attribute("model_family", request.descriptor.schema.family().into());
            span.set_attribute("prompt_length", request.prompt.chars().count().into());
            span.set_attribute("input_tokens", estimate_tokens(&request.prompt).into());
            span.set_attribute("stream.requested", request.requested_stream.into());
            span.set_attribute("stream.effective", request.stream.into());
            span.set_attribute("stream.downgraded", request.downgraded().into());
        }
        let request = finish(span, routed)?;

        info!(
            request_id,
            task = %request.task,
            model = request.model_id(),
            stream = request.stream,
            downgraded = request.downgraded(),
            "Dispatching request"
        );

        let mut span = self.hook.start("gateway");
        span.set_attribute("request_id", request_id.into());
        let invocation = self
            .gateway
            .invoke(
                &request.descriptor,
                &request.prompt,
                &request.options,
                request.stream,
                span.as_mut(),
            )
            .await;
        let invocation = finish(span, invocation)?;

        match invocation {
            Invocation::Streaming(rx) => {
                let mut span = self.hook.start("stream_encoder");
                span.set_attribute("request_id", request_id.into());
                span.set_attribute("model_id", request.model_id().into());
                let encoder = StreamEncoder::new(rx, self.formatter, span);
                Ok(DispatchOutcome::Stream(HtmlStream::new(
                    self.formatter.stream_head(),
                    encoder,
                )))
            }
            Invocation::Complete(response) => {
                let mut span = self.hook.start("formatter");
                span.set_attribute("request_id", request_id.into());
                span.set_attribute("content_bytes", response.content.len().into());
                let document = self.formatter.format(&response, request.task);
                if let Ok(document) = &document {
                    span.set_attribute("html_bytes", document.len().into());
                }
                finish(span, document).map(DispatchOutcome::Document)
            }
        }
    }

    /// Record a request whose body could not be read as a router failure.
    pub fn reject(&self, request_id: &str, error: DispatchError) -> DispatchError {
        let mut span = self.hook.start("router");
        span.set_attribute("request_id", request_id.into());
        span.end(Some(&error));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use serde_json::{json, Value};

    use crate::catalog::descriptor::Provider;
    use crate::catalog::registry::ModelCatalog;
    use crate::config::CatalogConfig;
    use crate::inference::gateway::GatewayPolicy;
    use crate::inference::provider::{EventStream, ProviderClient, ProviderError};
    use crate::inference::strategy::DispatchTable;
    use crate::observability::recording::RecordingHook;

    struct Canned(Mutex<VecDeque<Result<Value, ProviderError>>>);

    #[async_trait]
    impl ProviderClient for Canned {
        fn provider(&self) -> Provider {
            Provider::Bedrock
        }

        async fn generate(&self, _: &str, _: Value) -> Result<Value, ProviderError> {
            self.0.lock().unwrap().pop_front().unwrap()
        }

        async fn generate_stream(&self, _: &str, _: Value) -> Result<EventStream, ProviderError> {
            let events: Vec<_> = self.0.lock().unwrap().drain(..).collect();
            Ok(stream::iter(events).boxed())
        }
    }

    fn dispatcher(replies: Vec<Result<Value, ProviderError>>, hook: &RecordingHook) -> Dispatcher {
        let catalog = Arc::new(ModelCatalog::from_config(&CatalogConfig::default()).unwrap());
        let policy = GatewayPolicy {
            call_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(1),
            channel_capacity: 8,
        };
        let gateway = ModelGateway::new(policy, DispatchTable::standard())
            .with_client(Arc::new(Canned(Mutex::new(replies.into()))));
        Dispatcher::new(RequestRouter::new(catalog), gateway, Arc::new(hook.clone()))
    }

    #[tokio::test]
    async fn test_document_path_records_all_stages() {
        let hook = RecordingHook::new();
        let outcome = dispatcher(
            vec![Ok(json!({ "results": [{ "outputText": "Hi & bye" }] }))],
            &hook,
        )
        .dispatch(br#"{"task":"text","prompt":"say hi"}"#, "req-1")
        .await
        .unwrap();

        let DispatchOutcome::Document(html) = outcome else {
            panic!("expected document");
        };
        assert!(html.contains("Hi &amp; bye"));

        let names: Vec<_> = hook.records().iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["router", "gateway", "formatter"]);
        let router = hook.find("router").unwrap();
        assert_eq!(router.attribute("request_id"), Some(&"req-1".into()));
        assert_eq!(router.attribute("model_family"), Some(&"titan".into()));
        assert_eq!(router.attribute("prompt_length"), Some(&6i64.into()));
    }

    #[tokio::test]
    async fn test_rejection_recorded_before_provider_call() {
        let hook = RecordingHook::new();
        let err = dispatcher(vec![], &hook)
            .dispatch(br#"{"prompt":"no task"}"#, "req-2")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DispatchError::InvalidRequest(_)));
        let records = hook.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_kind(), Some("InvalidRequest"));
    }

    #[tokio::test]
    async fn test_empty_output_is_formatting_error() {
        let hook = RecordingHook::new();
        let err = dispatcher(
            vec![Ok(json!({ "results": [{ "outputText": "  " }] }))],
            &hook,
        )
        .dispatch(br#"{"task":"text","prompt":"hi"}"#, "req-3")
        .await
        .err()
        .unwrap();

        assert!(matches!(err, DispatchError::FormattingError(_)));
        assert_eq!(hook.find("formatter").unwrap().error_kind(), Some("FormattingError"));
    }

    #[tokio::test]
    async fn test_stream_path() {
        let hook = RecordingHook::new();
        let outcome = dispatcher(
            vec![
                Ok(json!({ "outputText": "a" })),
                Ok(json!({ "outputText": "b" })),
            ],
            &hook,
        )
        .dispatch(br#"{"task":"text","prompt":"hi","stream":true}"#, "req-4")
        .await
        .unwrap();

        let DispatchOutcome::Stream(stream) = outcome else {
            panic!("expected stream");
        };
        let (_, encoder) = stream.into_parts();
        let chunks: Vec<_> = encoder.into_stream().collect().await;
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].is_final);
        assert!(hook.find("stream_encoder").unwrap().error.is_none());
    }
}
