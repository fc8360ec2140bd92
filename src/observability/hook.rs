//! The ObservabilityHook contract.
//!
//! A hook hands out one [`SpanHandle`] per dispatcher stage. Handles collect
//! attributes and are closed exactly once with the stage's error, if any.
//! Hooks only observe: nothing they do feeds back into the stage outcome.

use std::fmt;
use std::sync::Arc;

use crate::error::DispatchError;

/// Attribute value attached to a span.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

/// Factory for stage spans.
pub trait ObservabilityHook: Send + Sync {
    fn start(&self, name: &'static str) -> Box<dyn SpanHandle>;
}

/// An open stage span.
pub trait SpanHandle: Send {
    fn set_attribute(&mut self, key: &'static str, value: AttrValue);

    /// Close the span. `error` is recorded before the caller propagates it.
    fn end(self: Box<Self>, error: Option<&DispatchError>);
}

pub type SharedHook = Arc<dyn ObservabilityHook>;

/// Close `span` with the outcome of `result` and hand the result back untouched.
pub fn finish<T>(span: Box<dyn SpanHandle>, result: Result<T, DispatchError>) -> Result<T, DispatchError> {
    match &result {
        Ok(_) => span.end(None),
        Err(e) => span.end(Some(e)),
    }
    result
}

/// Hook that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

struct NoopSpan;

impl ObservabilityHook for NoopHook {
    fn start(&self, _name: &'static str) -> Box<dyn SpanHandle> {
        Box::new(NoopSpan)
    }
}

impl SpanHandle for NoopSpan {
    fn set_attribute(&mut self, _key: &'static str, _value: AttrValue) {}

    fn end(self: Box<Self>, _error: Option<&DispatchError>) {}
}

/// Forwards every span to several hooks.
#[derive(Clone, Default)]
pub struct FanoutHook {
    hooks: Vec<SharedHook>,
}

impl FanoutHook {
    pub fn new(hooks: Vec<SharedHook>) -> Self {
        Self { hooks }
    }
}

struct FanoutSpan {
    spans: Vec<Box<dyn SpanHandle>>,
}

impl ObservabilityHook for FanoutHook {
    fn start(&self, name: &'static str) -> Box<dyn SpanHandle> {
        Box::new(FanoutSpan {
            spans: self.hooks.iter().map(|h| h.start(name)).collect(),
        })
    }
}

impl SpanHandle for FanoutSpan {
    fn set_attribute(&mut self, key: &'static str, value: AttrValue) {
        for span in &mut self.spans {
            span.set_attribute(key, value.clone());
        }
    }

    fn end(self: Box<Self>, error: Option<&DispatchError>) {
        for span in self.spans {
            span.end(error);
        }
    }
}
