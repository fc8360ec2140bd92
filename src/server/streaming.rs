//! Chunked HTML streaming.
//!
//! [`StreamEncoder`] turns the gateway's delta channel into ordered
//! [`StreamChunk`]s, and [`HtmlStream`] writes them as a chunked HTTP body:
//! the document head first, then each chunk payload verbatim.

use std::convert::Infallible;
use std::time::Instant;

use axum::body::Body;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::inference::types::{estimate_tokens, DeltaEvent};
use crate::observability::hook::SpanHandle;
use crate::render::html::{escape_text, ResponseFormatter};

/// One piece of a streamed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub sequence_no: u64,
    pub payload: String,
    pub is_final: bool,
}

/// Consumes one request's delta channel.
///
/// Emits one chunk per non-empty delta in arrival order, then exactly one
/// final chunk. The final chunk closes the document, preceded by an error
/// marker if the producer failed or vanished without completing.
pub struct StreamEncoder {
    rx: mpsc::Receiver<DeltaEvent>,
    formatter: ResponseFormatter,
    span: Option<Box<dyn SpanHandle>>,
    next_sequence: u64,
    payload_bytes: usize,
    estimated_tokens: u64,
    started: Instant,
}

impl StreamEncoder {
    pub fn new(
        rx: mpsc::Receiver<DeltaEvent>,
        formatter: ResponseFormatter,
        span: Box<dyn SpanHandle>,
    ) -> Self {
        Self {
            rx,
            formatter,
            span: Some(span),
            next_sequence: 0,
            payload_bytes: 0,
            estimated_tokens: 0,
            started: Instant::now(),
        }
    }

    /// Next chunk, or `None` once the final chunk has been emitted.
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        self.span.as_ref()?;

        loop {
            match self.rx.recv().await {
                Some(DeltaEvent::Delta(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.estimated_tokens += estimate_tokens(&text);
                    return Some(self.chunk(escape_text(&text), false));
                }
                Some(DeltaEvent::Done { token_count }) => {
                    let tail = self.formatter.stream_tail().to_string();
                    return Some(self.finish(tail, token_count, None));
                }
                Some(DeltaEvent::Failed(error)) => {
                    let error = match error {
                        DispatchError::StreamInterrupted(_) => error,
                        other => DispatchError::StreamInterrupted(other.to_string()),
                    };
                    let payload = self.formatter.stream_error(&error);
                    return Some(self.finish(payload, None, Some(error)));
                }
                None => {
                    let error = DispatchError::StreamInterrupted(
                        "provider stream ended without completing".to_string(),
                    );
                    let payload = self.formatter.stream_error(&error);
                    return Some(self.finish(payload, None, Some(error)));
                }
            }
        }
    }

    fn chunk(&mut self, payload: String, is_final: bool) -> StreamChunk {
        let chunk = StreamChunk {
            sequence_no: self.next_sequence,
            payload,
            is_final,
        };
        self.next_sequence += 1;
        self.payload_bytes += chunk.payload.len();
        chunk
    }

    fn finish(
        &mut self,
        payload: String,
        token_count: Option<u64>,
        error: Option<DispatchError>,
    ) -> StreamChunk {
        let delta_chunks = self.next_sequence;
        let chunk = self.chunk(payload, true);

        if let Some(mut span) = self.span.take() {
            span.set_attribute("chunks", delta_chunks.into());
            span.set_attribute("bytes", self.payload_bytes.into());
            span.set_attribute(
                "token_count",
                token_count.unwrap_or(self.estimated_tokens).into(),
            );
            span.set_attribute("token_count.estimated", token_count.is_none().into());
            span.set_attribute("latency_ms", (self.started.elapsed().as_millis() as u64).into());
            match &error {
                Some(e) => warn!(chunks = delta_chunks, error = %e, "Stream ended with error"),
                None => debug!(chunks = delta_chunks, bytes = self.payload_bytes, "Stream complete"),
            }
            span.end(error.as_ref());
        }
        chunk
    }

    /// Chunks as a stream; ends after the final chunk.
    pub fn into_stream(self) -> impl Stream<Item = StreamChunk> + Send + 'static {
        stream::unfold(self, |mut encoder| async move {
            let chunk = encoder.next_chunk().await?;
            Some((chunk, encoder))
        })
    }
}

impl Drop for StreamEncoder {
    fn drop(&mut self) {
        // Body dropped before the final chunk: the caller went away.
        if let Some(mut span) = self.span.take() {
            span.set_attribute("chunks", self.next_sequence.into());
            span.set_attribute("cancelled", true.into());
            span.end(Some(&DispatchError::StreamInterrupted(
                "client disconnected".to_string(),
            )));
        }
    }
}

/// A streamed HTML response: head plus encoded chunks.
pub struct HtmlStream {
    head: String,
    encoder: StreamEncoder,
}

impl HtmlStream {
    pub fn new(head: String, encoder: StreamEncoder) -> Self {
        Self { head, encoder }
    }

    pub fn into_parts(self) -> (String, StreamEncoder) {
        (self.head, self.encoder)
    }

    /// Chunked response body. Dropping it cancels the upstream call.
    pub fn into_body(self) -> Body {
        self.into_body_holding(())
    }

    /// Like [`HtmlStream::into_body`], keeping `guard` alive until the body
    /// is dropped.
    pub fn into_body_holding<G: Send + 'static>(self, guard: G) -> Body {
        let HtmlStream { head, encoder } = self;
        let head = stream::once(async move { head });
        let payloads = encoder.into_stream().map(|chunk| chunk.payload);
        Body::from_stream(head.chain(payloads).map(move |piece| {
            let _held = &guard;
            Ok::<_, Infallible>(piece)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::hook::ObservabilityHook;
    use crate::observability::recording::RecordingHook;

    async fn encode(events: Vec<DeltaEvent>, hook: &RecordingHook) -> Vec<StreamChunk> {
        let (tx, rx) = mpsc::channel(8);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        StreamEncoder::new(rx, ResponseFormatter::new(), hook.start("stream_encoder"))
            .into_stream()
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_chunks_follow_deltas() {
        let hook = RecordingHook::new();
        let chunks = encode(
            vec![
                DeltaEvent::Delta("a < b".into()),
                DeltaEvent::Delta(String::new()),
                DeltaEvent::Delta("\nend".into()),
                DeltaEvent::Done { token_count: Some(4) },
            ],
            &hook,
        )
        .await;

        let sequence: Vec<u64> = chunks.iter().map(|c| c.sequence_no).collect();
        assert_eq!(sequence, vec![0, 1, 2]);
        assert_eq!(chunks[0].payload, "a &lt; b");
        assert_eq!(chunks[1].payload, "<br>end");
        assert!(chunks[2].is_final);
        assert_eq!(chunks[2].payload, ResponseFormatter::new().stream_tail());
        assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);

        let record = hook.find("stream_encoder").unwrap();
        assert!(record.error.is_none());
        assert_eq!(record.attribute("chunks"), Some(&2i64.into()));
        assert_eq!(record.attribute("token_count"), Some(&4i64.into()));
    }

    #[tokio::test]
    async fn test_failure_yields_error_chunk() {
        let hook = RecordingHook::new();
        let chunks = encode(
            vec![
                DeltaEvent::Delta("partial".into()),
                DeltaEvent::Failed(DispatchError::StreamInterrupted("upstream reset".into())),
                DeltaEvent::Delta("ignored".into()),
            ],
            &hook,
        )
        .await;

        assert_eq!(chunks.len(), 2);
        let last = &chunks[1];
        assert!(last.is_final);
        assert!(last.payload.contains("data-error-kind=\"StreamInterrupted\""));
        assert!(last.payload.contains("upstream reset"));
        assert!(last.payload.ends_with("</html>\n"));
        assert_eq!(hook.find("stream_encoder").unwrap().error_kind(), Some("StreamInterrupted"));
    }

    #[tokio::test]
    async fn test_vanished_producer_is_interruption() {
        let hook = RecordingHook::new();
        let chunks = encode(vec![DeltaEvent::Delta("half".into())], &hook).await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_final);
        assert!(chunks[1].payload.contains("stream-error"));
    }

    #[tokio::test]
    async fn test_token_estimate_when_unreported() {
        let hook = RecordingHook::new();
        encode(
            vec![
                DeltaEvent::Delta("one two ".into()),
                DeltaEvent::Delta("three".into()),
                DeltaEvent::Done { token_count: None },
            ],
            &hook,
        )
        .await;

        let record = hook.find("stream_encoder").unwrap();
        assert_eq!(record.attribute("token_count.estimated"), Some(&true.into()));
        assert_eq!(record.attribute("token_count"), Some(&3i64.into()));
    }

    #[tokio::test]
    async fn test_dropped_encoder_records_cancellation() {
        let hook = RecordingHook::new();
        let (_tx, rx) = mpsc::channel::<DeltaEvent>(1);
        drop(StreamEncoder::new(rx, ResponseFormatter::new(), hook.start("stream_encoder")));

        let record = hook.find("stream_encoder").unwrap();
        assert_eq!(record.attribute("cancelled"), Some(&true.into()));
        assert_eq!(record.error_kind(), Some("StreamInterrupted"));
    }

    #[tokio::test]
    async fn test_body_is_head_then_payloads() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(DeltaEvent::Delta("hello".into())).await.unwrap();
        tx.send(DeltaEvent::Done { token_count: None }).await.unwrap();
        drop(tx);

        let formatter = ResponseFormatter::new();
        let encoder = StreamEncoder::new(rx, formatter, RecordingHook::new().start("stream_encoder"));
        let body = HtmlStream::new(formatter.stream_head(), encoder).into_body();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();

        let expected = format!("{}hello{}", formatter.stream_head(), formatter.stream_tail());
        assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), expected);
    }
}
