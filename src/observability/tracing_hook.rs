//! Hook that turns each finished stage into a `tracing` event.

use std::fmt::Write as _;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::DispatchError;
use crate::observability::hook::{AttrValue, ObservabilityHook, SpanHandle};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

struct TracingSpan {
    stage: &'static str,
    started: Instant,
    attributes: Vec<(&'static str, AttrValue)>,
}

impl ObservabilityHook for TracingHook {
    fn start(&self, name: &'static str) -> Box<dyn SpanHandle> {
        Box::new(TracingSpan {
            stage: name,
            started: Instant::now(),
            attributes: Vec::new(),
        })
    }
}

impl TracingSpan {
    fn render_attributes(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.attributes {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{key}={value}");
        }
        out
    }
}

impl SpanHandle for TracingSpan {
    fn set_attribute(&mut self, key: &'static str, value: AttrValue) {
        self.attributes.push((key, value));
    }

    fn end(self: Box<Self>, error: Option<&DispatchError>) {
        let latency_ms = self.started.elapsed().as_millis() as u64;
        let attributes = self.render_attributes();
        match error {
            None => info!(
                stage = self.stage,
                latency_ms,
                attributes = %attributes,
                "Stage complete"
            ),
            Some(e) => warn!(
                stage = self.stage,
                latency_ms,
                kind = e.kind().as_str(),
                error = %e,
                attributes = %attributes,
                "Stage failed"
            ),
        }
    }
}
