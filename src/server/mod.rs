//! HTTP server returning rendered HTML.
//!
//! - [`api`]: routes, handlers and shared state
//! - [`streaming`]: delta channel to chunked HTML body

pub mod api;
pub mod streaming;
