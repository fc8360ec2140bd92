//! Prometheus-backed hook.
//!
//! Exposes per-stage latency, error counts by kind, provider retries, and
//! streaming downgrades. The registry is rendered by the `/metrics` route.

use std::time::Instant;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::DispatchError;
use crate::observability::hook::{AttrValue, ObservabilityHook, SpanHandle};

#[derive(Clone)]
pub struct MetricsHook {
    stage_duration: HistogramVec,
    stage_errors: IntCounterVec,
    retries: IntCounterVec,
    downgrades: IntCounterVec,
}

impl MetricsHook {
    /// Create the collectors and register them with `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let stage_duration = HistogramVec::new(
            HistogramOpts::new(
                "dispatcher_stage_duration_seconds",
                "Time spent in each dispatcher stage",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["stage", "outcome"],
        )?;
        let stage_errors = IntCounterVec::new(
            Opts::new("dispatcher_stage_errors_total", "Stage failures by error kind"),
            &["stage", "kind"],
        )?;
        let retries = IntCounterVec::new(
            Opts::new("dispatcher_provider_retries_total", "Provider call retries"),
            &["provider"],
        )?;
        let downgrades = IntCounterVec::new(
            Opts::new(
                "dispatcher_stream_downgrades_total",
                "Streaming requests served non-streaming",
            ),
            &["model_id"],
        )?;

        registry.register(Box::new(stage_duration.clone()))?;
        registry.register(Box::new(stage_errors.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(downgrades.clone()))?;

        Ok(Self {
            stage_duration,
            stage_errors,
            retries,
            downgrades,
        })
    }
}

/// Render `registry` in the Prometheus text exposition format.
pub fn render(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&registry.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

struct MetricsSpan {
    hook: MetricsHook,
    stage: &'static str,
    started: Instant,
    provider: Option<String>,
    model_id: Option<String>,
    retry_count: i64,
    downgraded: bool,
}

impl ObservabilityHook for MetricsHook {
    fn start(&self, name: &'static str) -> Box<dyn SpanHandle> {
        Box::new(MetricsSpan {
            hook: self.clone(),
            stage: name,
            started: Instant::now(),
            provider: None,
            model_id: None,
            retry_count: 0,
            downgraded: false,
        })
    }
}

impl SpanHandle for MetricsSpan {
    fn set_attribute(&mut self, key: &'static str, value: AttrValue) {
        match (key, value) {
            ("provider", AttrValue::Str(p)) => self.provider = Some(p),
            ("model_id", AttrValue::Str(m)) => self.model_id = Some(m),
            ("retry_count", AttrValue::Int(n)) => self.retry_count = n,
            ("stream.downgraded", AttrValue::Bool(b)) => self.downgraded = b,
            _ => {}
        }
    }

    fn end(self: Box<Self>, error: Option<&DispatchError>) {
        let outcome = if error.is_some() { "error" } else { "ok" };
        self.hook
            .stage_duration
            .with_label_values(&[self.stage, outcome])
            .observe(self.started.elapsed().as_secs_f64());

        if let Some(e) = error {
            self.hook
                .stage_errors
                .with_label_values(&[self.stage, e.kind().as_str()])
                .inc();
        }
        if self.retry_count > 0 {
            let provider = self.provider.as_deref().unwrap_or("unknown");
            self.hook
                .retries
                .with_label_values(&[provider])
                .inc_by(self.retry_count as u64);
        }
        if self.downgraded {
            let model = self.model_id.as_deref().unwrap_or("unknown");
            self.hook.downgrades.with_label_values(&[model]).inc();
        }
    }
}
