//! Points and stream items.
//!
//! A [`Point`] is one record flowing through a program: an unordered map
//! from field name to [`Value`]. The runtime moves points between stages
//! wrapped in [`StreamItem`], which adds the control items the scheduler
//! and the order-enforcing fan-in care about: ticks, marks, and
//! end-of-stream.
//!
//! Timestamps are logical milliseconds (`i64`) end to end.

use std::fmt;

use fxhash::FxHashMap;
use serde::Serialize;

/// The canonical name of the time field on a point.
pub const TIME_FIELD: &str = "time";

/// A scalar value carried by a point field or a proc option.
///
/// The full value system (strings with semantics, nested containers,
/// filter expressions) belongs to the front end; this is the interface
/// subset the graph and runtime need.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Numeric (f64, as in the source language).
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// A moment in time, in milliseconds.
    Time(i64),
    /// A span of time, in milliseconds.
    Duration(i64),
}

impl Value {
    /// Returns the timestamp if this value is a valid time.
    #[must_use]
    pub fn as_time(&self) -> Option<i64> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the span in milliseconds if this value is a duration.
    #[must_use]
    pub fn as_duration(&self) -> Option<i64> {
        match self {
            Value::Duration(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns true if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Time(t) => write!(f, ":{t}ms:"),
            Value::Duration(d) => write!(f, ":+{d}ms:"),
        }
    }
}

/// One record flowing through a program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Point {
    /// Field name to value.
    pub fields: FxHashMap<String, Value>,
}

impl Point {
    /// Creates an empty point.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a point carrying only a time field.
    #[must_use]
    pub fn at(time: i64) -> Self {
        let mut p = Self::new();
        p.fields.insert(TIME_FIELD.to_string(), Value::Time(time));
        p
    }

    /// Sets a field, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the point's timestamp, if it has a valid time field.
    #[must_use]
    pub fn time(&self) -> Option<i64> {
        self.get(TIME_FIELD).and_then(Value::as_time)
    }
}

/// An item on a stream between stages.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A data point.
    Point(Point),
    /// A data-free liveness tick carrying only a timestamp.
    Tick(i64),
    /// A batch-boundary marker: "this historic batch is complete".
    Mark(i64),
    /// End of stream.
    Eof,
}

impl StreamItem {
    /// Returns the timestamp this item advances logical time to, if any.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            StreamItem::Point(p) => p.time(),
            StreamItem::Tick(t) | StreamItem::Mark(t) => Some(*t),
            StreamItem::Eof => None,
        }
    }

    /// Returns true for a data point.
    #[must_use]
    pub fn is_point(&self) -> bool {
        matches!(self, StreamItem::Point(_))
    }
}
