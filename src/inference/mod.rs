//! Provider invocation.
//!
//! - [`gateway`]: ModelGateway, timeout and retry policy, the streaming producer
//! - [`strategy`]: `(provider, modality)` dispatch table and per-family bodies
//! - [`provider`]: the `ProviderClient` transport contract and its error signals
//! - [`bedrock`], [`ollama`]: shipped transports
//! - [`eventstream`]: AWS event-stream framing used by Bedrock streaming
//! - [`types`]: responses, options and delta events

pub mod bedrock;
pub mod eventstream;
pub mod gateway;
pub mod ollama;
pub mod provider;
pub mod strategy;
pub mod types;
