//! html-inference-dispatcher: stateless HTTP front for generative models.
//!
//! Validates a text or image generation request, invokes the selected model
//! provider (Amazon Bedrock or Ollama) with a timeout and a single retry on
//! throttling, and returns the output as a self-contained HTML document,
//! either whole or streamed chunk by chunk as the model produces it.

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod inference;
pub mod observability;
pub mod render;
pub mod server;
