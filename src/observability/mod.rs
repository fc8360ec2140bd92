//! Stage instrumentation.
//!
//! - [`hook`]: the ObservabilityHook / SpanHandle contract and combinators
//! - [`tracing_hook`]: one structured log event per finished stage
//! - [`metrics`]: Prometheus stage latency and error counters
//! - [`recording`]: in-memory hook for assertions

pub mod hook;
pub mod metrics;
pub mod recording;
pub mod tracing_hook;
