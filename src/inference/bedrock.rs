//! Amazon Bedrock runtime transport.
//!
//! Authenticates with a Bedrock API key sent as a bearer token. Streaming calls
//! decode the binary event stream; each `chunk` event carries base64 model JSON.

use std::collections::VecDeque;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::catalog::descriptor::Provider;
use crate::config::BedrockConfig;
use crate::inference::eventstream::{EventStreamDecoder, Message};
use crate::inference::provider::{classify_http_error, EventStream, ProviderClient, ProviderError};

const EVENT_STREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

pub struct BedrockClient {
    http: Client,
    endpoint: String,
    bearer_token: Option<SecretString>,
}

impl BedrockClient {
    pub fn new(http: Client, config: &BedrockConfig) -> Self {
        Self {
            http,
            endpoint: config.endpoint_url(),
            bearer_token: config.bearer_token.clone(),
        }
    }

    fn model_url(&self, model_id: &str, action: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ProviderError::Failure(format!("invalid Bedrock endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Failure("Bedrock endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(["model", model_id, action]);
        Ok(url)
    }

    async fn post(
        &self,
        model_id: &str,
        action: &str,
        accept: &str,
        body: &Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.model_url(model_id, action)?;
        debug!(model = model_id, %url, "Bedrock request");

        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .json(body);
        if let Some(token) = &self.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_http_error(status.as_u16(), &text))
    }
}

#[async_trait]
impl ProviderClient for BedrockClient {
    fn provider(&self) -> Provider {
        Provider::Bedrock
    }

    async fn generate(&self, model_id: &str, body: Value) -> Result<Value, ProviderError> {
        let response = self.post(model_id, "invoke", "application/json", &body).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn generate_stream(&self, model_id: &str, body: Value) -> Result<EventStream, ProviderError> {
        let response = self
            .post(
                model_id,
                "invoke-with-response-stream",
                EVENT_STREAM_CONTENT_TYPE,
                &body,
            )
            .await?;
        Ok(decode_event_stream(response.bytes_stream().boxed()))
    }
}

/// Turn a Bedrock event-stream byte feed into model JSON events.
pub fn decode_event_stream(body: BoxStream<'static, reqwest::Result<Bytes>>) -> EventStream {
    struct State {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        decoder: EventStreamDecoder,
        pending: VecDeque<Result<Value, ProviderError>>,
        finished: bool,
    }

    let state = State {
        body,
        decoder: EventStreamDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.decoder.push(&bytes);
                    loop {
                        match st.decoder.next_message() {
                            Ok(Some(message)) => {
                                if let Some(event) = message_to_event(&message) {
                                    let failed = event.is_err();
                                    st.pending.push_back(event);
                                    if failed {
                                        st.finished = true;
                                        break;
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                st.pending.push_back(Err(ProviderError::Malformed(e.to_string())));
                                st.finished = true;
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(ProviderError::Failure(e.to_string())), st));
                }
                None => {
                    st.finished = true;
                    if let Err(e) = st.decoder.finish() {
                        st.pending.push_back(Err(ProviderError::Malformed(e.to_string())));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Map one framed message onto a model event; unknown event types are skipped.
fn message_to_event(message: &Message) -> Option<Result<Value, ProviderError>> {
    match message.header(":message-type") {
        Some("event") => {
            if message.header(":event-type") != Some("chunk") {
                return None;
            }
            Some(decode_chunk(&message.payload))
        }
        Some("exception") | Some("error") => {
            let exception = message
                .header(":exception-type")
                .or_else(|| message.header(":error-code"))
                .unwrap_or("unknownException");
            let detail = serde_json::from_slice::<Value>(&message.payload)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| String::from_utf8_lossy(&message.payload).into_owned());
            let text = format!("{exception}: {detail}");

            Some(Err(if exception.to_lowercase().contains("throttl") {
                ProviderError::Throttled(text)
            } else if exception == "accessDeniedException" {
                ProviderError::AccessDenied(text)
            } else {
                ProviderError::Failure(text)
            }))
        }
        _ => None,
    }
}

fn decode_chunk(payload: &[u8]) -> Result<Value, ProviderError> {
    let envelope: Value = serde_json::from_slice(payload)
        .map_err(|e| ProviderError::Malformed(format!("chunk envelope: {e}")))?;
    let encoded = envelope
        .get("bytes")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Malformed("chunk without bytes".into()))?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ProviderError::Malformed(format!("chunk bytes: {e}")))?;
    serde_json::from_slice(&raw).map_err(|e| ProviderError::Malformed(format!("chunk body: {e}")))
}
