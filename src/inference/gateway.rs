//! ModelGateway: uniform provider invocation with timeout and retry policy.
//!
//! For streaming text calls the gateway opens the upstream stream and reads
//! ahead until the first event carrying text. Until then the call has not
//! started and a throttled start is retried. It then hands the caller a
//! bounded channel fed by a spawned producer task. The producer stops and
//! drops the upstream call as soon as the receiver goes away.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::catalog::descriptor::{Modality, ModelDescriptor, Provider};
use crate::config::Config;
use crate::error::DispatchError;
use crate::inference::bedrock::BedrockClient;
use crate::inference::ollama::OllamaClient;
use crate::inference::provider::{http_client, EventStream, ProviderClient, ProviderError};
use crate::inference::strategy::{DispatchTable, ParseEvent};
use crate::inference::types::{DeltaEvent, GenerationOptions, ModelResponse, ResponseMetadata};
use crate::observability::hook::SpanHandle;

/// Timeout, retry, and channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayPolicy {
    pub call_timeout: Duration,
    pub retry_backoff: Duration,
    pub channel_capacity: usize,
}

impl GatewayPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            retry_backoff: config.retry_backoff(),
            channel_capacity: config.gateway.channel_capacity.max(1),
        }
    }
}

/// Outcome of a successful invocation.
#[derive(Debug)]
pub enum Invocation {
    Complete(ModelResponse),
    Streaming(mpsc::Receiver<DeltaEvent>),
}

pub struct ModelGateway {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
    table: DispatchTable,
    policy: GatewayPolicy,
}

impl ModelGateway {
    pub fn new(policy: GatewayPolicy, table: DispatchTable) -> Self {
        Self {
            clients: HashMap::new(),
            table,
            policy,
        }
    }

    /// Register the transport for the provider it reports.
    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    /// Gateway with the standard table and HTTP clients for every provider.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let http = http_client(Duration::from_secs(10))?;
        Ok(
            Self::new(GatewayPolicy::from_config(config), DispatchTable::standard())
                .with_client(Arc::new(BedrockClient::new(
                    http.clone(),
                    &config.providers.bedrock,
                )))
                .with_client(Arc::new(OllamaClient::new(http, &config.providers.ollama))),
        )
    }

    /// Invoke `descriptor` with `prompt`.
    ///
    /// Image models are always called once, synchronously. Text models stream
    /// only when `streaming` is set and both the descriptor and its strategy
    /// support it.
    pub async fn invoke(
        &self,
        descriptor: &Arc<ModelDescriptor>,
        prompt: &str,
        options: &GenerationOptions,
        streaming: bool,
        span: &mut dyn SpanHandle,
    ) -> Result<Invocation, DispatchError> {
        span.set_attribute("provider", descriptor.provider.as_str().into());
        span.set_attribute("model_id", descriptor.id.as_str().into());

        let strategy = self
            .table
            .get(descriptor.provider, descriptor.modality)
            .ok_or_else(|| {
                DispatchError::ProviderUnavailable(format!(
                    "no invocation strategy for {} {} models",
                    descriptor.provider, descriptor.modality
                ))
            })?;
        let client = self.clients.get(&descriptor.provider).ok_or_else(|| {
            DispatchError::ProviderUnavailable(format!(
                "no client configured for provider {}",
                descriptor.provider
            ))
        })?;

        let parse_event = strategy.parse_event.filter(|_| {
            streaming && descriptor.modality == Modality::Text && descriptor.supports_streaming
        });
        let body = (strategy.build_body)(descriptor, prompt, options, parse_event.is_some());
        span.set_attribute("streaming", parse_event.is_some().into());

        let mut retries = 0u32;
        let result = match parse_event {
            Some(parse_event) => self
                .open_stream(client.clone(), descriptor.clone(), body, parse_event, &mut retries)
                .await
                .map(Invocation::Streaming),
            None => {
                let started = Instant::now();
                self.call_complete(client.as_ref(), descriptor, body, &mut retries)
                    .await
                    .and_then(|raw| {
                        let parsed = (strategy.parse_response)(descriptor, &raw)?;
                        Ok(ModelResponse {
                            content: parsed.content,
                            metadata: ResponseMetadata {
                                token_count: parsed.token_count,
                                latency_ms: started.elapsed().as_millis() as u64,
                            },
                        })
                    })
                    .map_err(DispatchError::from)
                    .map(|response| {
                        if let Some(tokens) = response.metadata.token_count {
                            span.set_attribute("token_count", tokens.into());
                        }
                        span.set_attribute("byte_count", response.content.len().into());
                        span.set_attribute("latency_ms", response.metadata.latency_ms.into());
                        Invocation::Complete(response)
                    })
            }
        };

        span.set_attribute("retry_count", retries.into());
        result
    }

    /// Run `attempt`, retrying exactly once after the fixed backoff if the
    /// first failure is a throttling signal.
    async fn with_retry<T, F, Fut>(
        &self,
        model_id: &str,
        retries: &mut u32,
        mut attempt: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        loop {
            match attempt().await {
                Err(e) if e.is_throttled() && *retries == 0 => {
                    *retries += 1;
                    warn!(
                        model = model_id,
                        backoff_ms = self.policy.retry_backoff.as_millis() as u64,
                        error = %e,
                        "Provider throttled, retrying once"
                    );
                    tokio::time::sleep(self.policy.retry_backoff).await;
                }
                other => return other,
            }
        }
    }

    fn timed_out(&self) -> ProviderError {
        ProviderError::Failure(format!(
            "provider call exceeded {}s budget",
            self.policy.call_timeout.as_secs()
        ))
    }

    async fn call_complete(
        &self,
        client: &dyn ProviderClient,
        descriptor: &ModelDescriptor,
        body: Value,
        retries: &mut u32,
    ) -> Result<Value, ProviderError> {
        let call = self.with_retry(&descriptor.id, retries, || {
            client.generate(&descriptor.id, body.clone())
        });
        match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out()),
        }
    }

    async fn open_stream(
        &self,
        client: Arc<dyn ProviderClient>,
        descriptor: Arc<ModelDescriptor>,
        body: Value,
        parse_event: ParseEvent,
        retries: &mut u32,
    ) -> Result<mpsc::Receiver<DeltaEvent>, DispatchError> {
        let deadline = tokio::time::Instant::now() + self.policy.call_timeout;

        let open = self.with_retry(&descriptor.id, retries, || {
            let client = client.clone();
            let body = body.clone();
            let descriptor = descriptor.clone();
            async move {
                let mut events = client.generate_stream(&descriptor.id, body).await?;
                let mut prelude = VecDeque::new();
                // Metadata events (message start, role) precede the first text.
                while let Some(event) = events.next().await {
                    let event = event?;
                    let has_text = parse_event(&descriptor, &event)
                        .text
                        .is_some_and(|t| !t.is_empty());
                    prelude.push_back(event);
                    if has_text {
                        break;
                    }
                }
                Ok((prelude, events))
            }
        });
        let (prelude, events) = match tokio::time::timeout_at(deadline, open).await {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out().into()),
        };

        debug!(model = %descriptor.id, buffered = prelude.len(), "Provider stream opened");
        let (tx, rx) = mpsc::channel(self.policy.channel_capacity);
        tokio::spawn(pump(prelude, events, descriptor, parse_event, tx, deadline));
        Ok(rx)
    }
}

/// Producer side of the delta channel. Replays the events read while
/// opening, then continues with the live stream.
async fn pump(
    mut prelude: VecDeque<Value>,
    mut events: EventStream,
    descriptor: Arc<ModelDescriptor>,
    parse_event: ParseEvent,
    tx: mpsc::Sender<DeltaEvent>,
    deadline: tokio::time::Instant,
) {
    let mut token_count = None;
    let mut deltas = 0usize;

    loop {
        let next = match prelude.pop_front() {
            Some(event) => Some(Ok(event)),
            None => tokio::select! {
                _ = tx.closed() => {
                    info!(model = %descriptor.id, deltas, "Receiver dropped, cancelling provider stream");
                    return;
                }
                next = tokio::time::timeout_at(deadline, events.next()) => match next {
                    Ok(next) => next,
                    Err(_) => {
                        let _ = tx
                            .send(DeltaEvent::Failed(DispatchError::StreamInterrupted(
                                "provider stream exceeded its time budget".to_string(),
                            )))
                            .await;
                        return;
                    }
                },
            },
        };

        match next {
            Some(Ok(event)) => {
                let piece = parse_event(&descriptor, &event);
                if piece.token_count.is_some() {
                    token_count = piece.token_count;
                }
                if let Some(text) = piece.text.filter(|t| !t.is_empty()) {
                    deltas += 1;
                    if tx.send(DeltaEvent::Delta(text)).await.is_err() {
                        info!(model = %descriptor.id, deltas, "Receiver dropped, cancelling provider stream");
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(model = %descriptor.id, deltas, error = %e, "Provider stream failed");
                let _ = tx
                    .send(DeltaEvent::Failed(DispatchError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
            None => {
                debug!(model = %descriptor.id, deltas, "Provider stream complete");
                let _ = tx.send(DeltaEvent::Done { token_count }).await;
                return;
            }
        }
    }
}
