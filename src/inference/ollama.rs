//! Ollama transport (`POST /api/generate`). Streaming responses are
//! newline-delimited JSON objects.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::catalog::descriptor::Provider;
use crate::config::OllamaConfig;
use crate::inference::provider::{classify_http_error, EventStream, ProviderClient, ProviderError};

pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(http: Client, config: &OllamaConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(%url, "Ollama request");

        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_http_error(status.as_u16(), &text))
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    async fn generate(&self, _model_id: &str, body: Value) -> Result<Value, ProviderError> {
        let response = self.post(&body).await?;
        let value = response.json::<Value>().await?;
        match value.get("error").and_then(Value::as_str) {
            Some(error) => Err(ProviderError::Failure(error.to_string())),
            None => Ok(value),
        }
    }

    async fn generate_stream(&self, _model_id: &str, body: Value) -> Result<EventStream, ProviderError> {
        let response = self.post(&body).await?;
        Ok(decode_ndjson(response.bytes_stream().boxed()))
    }
}

fn parse_line(line: &[u8]) -> Option<Result<Value, ProviderError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    let value = match serde_json::from_slice::<Value>(line) {
        Ok(value) => value,
        Err(e) => return Some(Err(ProviderError::Malformed(format!("stream line: {e}")))),
    };
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Some(Err(ProviderError::Failure(error.to_string()))),
        None => Some(Ok(value)),
    }
}

/// Split a byte feed into JSON lines.
pub fn decode_ndjson(body: BoxStream<'static, reqwest::Result<Bytes>>) -> EventStream {
    struct State {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        buffer: BytesMut,
        pending: VecDeque<Result<Value, ProviderError>>,
        finished: bool,
    }

    let state = State {
        body,
        buffer: BytesMut::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.finished = true;
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(&bytes);
                    while let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                        let line = st.buffer.split_to(pos + 1);
                        if let Some(event) = parse_line(&line) {
                            st.pending.push_back(event);
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(ProviderError::Failure(e.to_string())), st));
                }
                None => {
                    st.finished = true;
                    let rest = st.buffer.split();
                    if let Some(event) = parse_line(&rest) {
                        st.pending.push_back(event);
                    }
                }
            }
        }
    })
    .boxed()
}
