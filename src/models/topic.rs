//! Topic values and user-code outcomes
//!
//! Topics are the values under test. Every piece of user code (setup, topic,
//! vow, teardown) reports back through [`Outcome`], which carries skips and
//! failures as explicit variants instead of relying on error type inspection.

use serde::{Deserialize, Serialize};
use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type returned by user code
pub type Outcome<T = ()> = Result<T, Failure>;

/// Captured error details: type, value and traceback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub traceback: String,
}

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
            traceback: String::new(),
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = traceback.into();
        self
    }

    /// Build a record from any error, using the short type name as its kind
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let mut traceback = String::new();
        let mut source = err.source();
        while let Some(cause) = source {
            traceback.push_str(&format!("caused by: {cause}\n"));
            source = cause.source();
        }
        Self::new(short_type_name::<E>(), err.to_string()).with_traceback(traceback)
    }

    /// Build a record from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let value = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::new("panic", value)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.value)
    }
}

fn short_type_name<T: ?Sized>() -> String {
    let full = any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Non-success outcome of user code
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Failure {
    /// Explicit skip signal; cascades down a subtree but is not a failure
    #[error("skipped: {0}")]
    Skip(String),

    /// Genuine error
    #[error("{0}")]
    Error(ErrorRecord),
}

impl Failure {
    pub fn skip(reason: impl Into<String>) -> Self {
        Failure::Skip(reason.into())
    }

    pub fn error(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Failure::Error(ErrorRecord::new(kind, value))
    }

    pub fn from_error<E: std::error::Error>(err: E) -> Self {
        Failure::Error(ErrorRecord::from_error(&err))
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Failure::Skip(_))
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        let traceback = err
            .chain()
            .skip(1)
            .map(|cause| format!("caused by: {cause}\n"))
            .collect::<String>();
        Failure::Error(ErrorRecord::new("Error", err.to_string()).with_traceback(traceback))
    }
}

impl From<ErrorRecord> for Failure {
    fn from(record: ErrorRecord) -> Self {
        Failure::Error(record)
    }
}

/// Fail with an error record unless the condition holds
pub fn ensure(condition: bool, message: impl Into<String>) -> Outcome {
    if condition {
        Ok(())
    } else {
        Err(Failure::error("AssertionError", message))
    }
}

/// Immutable, shareable topic value
///
/// Holds any `Send + Sync` value together with its `Debug` rendering, which is
/// what reports show as the topic a vow ran against.
#[derive(Clone)]
pub struct TopicValue {
    inner: Arc<dyn Any + Send + Sync>,
    repr: Arc<str>,
}

impl TopicValue {
    pub fn new<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        let repr: Arc<str> = format!("{value:?}").into();
        Self {
            inner: Arc::new(value),
            repr,
        }
    }

    /// Topic of a context with nothing to inherit
    pub fn none() -> Self {
        Self::new(())
    }

    pub fn is_none(&self) -> bool {
        self.inner.is::<()>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Whether the topic holds a `T` equal to `expected`
    pub fn equals<T: Any + PartialEq>(&self, expected: &T) -> bool {
        self.downcast_ref::<T>() == Some(expected)
    }

    pub fn repr(&self) -> &str {
        &self.repr
    }
}

impl fmt::Debug for TopicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

/// What a topic function resolves to
#[derive(Clone, Debug)]
pub enum Topic {
    /// A single value shared by the context's vows and children
    Value(TopicValue),

    /// One independent run of vows and children per element
    Enumerated(Vec<TopicValue>),
}

impl Topic {
    pub fn value<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        Topic::Value(TopicValue::new(value))
    }

    pub fn enumerate<T, I>(items: I) -> Self
    where
        T: Any + Send + Sync + fmt::Debug,
        I: IntoIterator<Item = T>,
    {
        Topic::Enumerated(items.into_iter().map(TopicValue::new).collect())
    }
}

impl From<TopicValue> for Topic {
    fn from(value: TopicValue) -> Self {
        Topic::Value(value)
    }
}

/// Ancestor-derived arguments for a topic function, nearest ancestor first
#[derive(Clone, Debug, Default)]
pub struct TopicArgs(Vec<TopicValue>);

impl TopicArgs {
    pub fn new(values: Vec<TopicValue>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Option<&TopicValue> {
        self.0.get(index)
    }

    /// Typed access to the argument at `index`
    pub fn arg<T: Any>(&self, index: usize) -> Option<&T> {
        self.get(index).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicValue> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("division by zero")]
    struct ZeroDivisionError;

    #[test]
    fn test_topic_value_downcast() {
        let value = TopicValue::new(42_i32);
        assert!(value.equals(&42_i32));
        assert_eq!(value.downcast_ref::<i32>(), Some(&42));
        assert!(value.downcast_ref::<String>().is_none());
        assert_eq!(value.repr(), "42");
    }

    #[test]
    fn test_none_topic() {
        assert!(TopicValue::none().is_none());
        assert!(!TopicValue::new("a").is_none());
    }

    #[test]
    fn test_error_record_from_error() {
        let record = ErrorRecord::from_error(&ZeroDivisionError);
        assert_eq!(record.kind, "ZeroDivisionError");
        assert_eq!(record.value, "division by zero");
        assert_eq!(record.to_string(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_error_record_from_panic() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let record = ErrorRecord::from_panic(payload);
        assert_eq!(record.kind, "panic");
        assert_eq!(record.value, "boom");
    }

    #[test]
    fn test_failure_from_anyhow() {
        let err = anyhow::anyhow!("root").context("outer");
        match Failure::from(err) {
            Failure::Error(record) => {
                assert_eq!(record.value, "outer");
                assert!(record.traceback.contains("root"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ensure() {
        assert!(ensure(true, "fine").is_ok());
        assert!(!ensure(false, "nope").unwrap_err().is_skip());
    }

    #[test]
    fn test_topic_args() {
        let args = TopicArgs::new(vec![TopicValue::new("mid"), TopicValue::new("root")]);
        assert_eq!(args.len(), 2);
        assert_eq!(args.arg::<&str>(0), Some(&"mid"));
        assert_eq!(args.arg::<&str>(1), Some(&"root"));
        assert!(args.get(2).is_none());
    }
}
