//! In-memory hook. Keeps every finished span for later inspection.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::DispatchError;
use crate::observability::hook::{AttrValue, ObservabilityHook, SpanHandle};

/// A finished span.
#[derive(Debug, Clone)]
pub struct SpanRecord {
    pub name: &'static str,
    pub attributes: Vec<(&'static str, AttrValue)>,
    pub error: Option<DispatchError>,
    pub duration: Duration,
}

impl SpanRecord {
    /// Last value set for `key`.
    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn error_kind(&self) -> Option<&'static str> {
        self.error.as_ref().map(|e| e.kind().as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingHook {
    records: Arc<Mutex<Vec<SpanRecord>>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all finished spans, in completion order.
    pub fn records(&self) -> Vec<SpanRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// First finished span called `name`.
    pub fn find(&self, name: &str) -> Option<SpanRecord> {
        self.records().into_iter().find(|r| r.name == name)
    }
}

struct RecordingSpan {
    name: &'static str,
    started: Instant,
    attributes: Vec<(&'static str, AttrValue)>,
    sink: Arc<Mutex<Vec<SpanRecord>>>,
}

impl ObservabilityHook for RecordingHook {
    fn start(&self, name: &'static str) -> Box<dyn SpanHandle> {
        Box::new(RecordingSpan {
            name,
            started: Instant::now(),
            attributes: Vec::new(),
            sink: self.records.clone(),
        })
    }
}

impl SpanHandle for RecordingSpan {
    fn set_attribute(&mut self, key: &'static str, value: AttrValue) {
        self.attributes.push((key, value));
    }

    fn end(self: Box<Self>, error: Option<&DispatchError>) {
        let record = SpanRecord {
            name: self.name,
            attributes: self.attributes,
            error: error.cloned(),
            duration: self.started.elapsed(),
        };
        if let Ok(mut records) = self.sink.lock() {
            records.push(record);
        }
    }
}
