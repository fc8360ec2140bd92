//! AWS event-stream framing, as used by Bedrock's `invoke-with-response-stream`.
//!
//! ```text
//! | total_len u32 | headers_len u32 | prelude_crc u32 | headers | payload | message_crc u32 |
//! ```
//!
//! Header: `name_len u8 | name | type u8 | value`. Only string-typed header
//! values are kept; the others are skipped by their fixed or prefixed length.
//! CRC fields are not verified.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventStreamError {
    #[error("invalid message length {0}")]
    InvalidLength(usize),

    #[error("headers overrun the message")]
    HeaderOverrun,

    #[error("unknown header value type {0}")]
    UnknownHeaderType(u8),

    #[error("stream ended inside a message")]
    Truncated,
}

/// One decoded event-stream message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub headers: HashMap<String, String>,
    pub payload: Bytes,
}

impl Message {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Incremental decoder: push bytes as they arrive, pull complete messages.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete message, or `None` until more bytes arrive.
    pub fn next_message(&mut self) -> Result<Option<Message>, EventStreamError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let mut prelude = &self.buffer[..PRELUDE_LEN];
        let total_len = prelude.get_u32() as usize;
        let headers_len = prelude.get_u32() as usize;

        if total_len < PRELUDE_LEN + TRAILER_LEN || total_len > MAX_MESSAGE_LEN {
            return Err(EventStreamError::InvalidLength(total_len));
        }
        if headers_len > total_len - PRELUDE_LEN - TRAILER_LEN {
            return Err(EventStreamError::HeaderOverrun);
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let frame = self.buffer.split_to(total_len).freeze();
        let headers = parse_headers(&frame[PRELUDE_LEN..PRELUDE_LEN + headers_len])?;
        let payload = frame.slice(PRELUDE_LEN + headers_len..total_len - TRAILER_LEN);

        Ok(Some(Message { headers, payload }))
    }

    /// Call at end of input: leftover bytes mean a cut-off message.
    pub fn finish(&self) -> Result<(), EventStreamError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(EventStreamError::Truncated)
        }
    }
}

fn parse_headers(mut raw: &[u8]) -> Result<HashMap<String, String>, EventStreamError> {
    let mut headers = HashMap::new();

    while raw.has_remaining() {
        let name_len = raw.get_u8() as usize;
        if raw.remaining() < name_len + 1 {
            return Err(EventStreamError::HeaderOverrun);
        }
        let name = String::from_utf8_lossy(&raw[..name_len]).into_owned();
        raw.advance(name_len);

        let value_type = raw.get_u8();
        let fixed = match value_type {
            0 | 1 => Some(0),
            2 => Some(1),
            3 => Some(2),
            4 => Some(4),
            5 | 8 => Some(8),
            9 => Some(16),
            6 | 7 => None,
            other => return Err(EventStreamError::UnknownHeaderType(other)),
        };

        match fixed {
            Some(len) => {
                if raw.remaining() < len {
                    return Err(EventStreamError::HeaderOverrun);
                }
                raw.advance(len);
            }
            None => {
                if raw.remaining() < 2 {
                    return Err(EventStreamError::HeaderOverrun);
                }
                let len = raw.get_u16() as usize;
                if raw.remaining() < len {
                    return Err(EventStreamError::HeaderOverrun);
                }
                if value_type == 7 {
                    headers.insert(name, String::from_utf8_lossy(&raw[..len]).into_owned());
                }
                raw.advance(len);
            }
        }
    }

    Ok(headers)
}

/// Encode a message with string headers. CRC fields are zero-filled.
pub fn encode_message(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    let total_len = PRELUDE_LEN + header_bytes.len() + payload.len() + TRAILER_LEN;
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&(total_len as u32).to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0; 4]);
    out
}
