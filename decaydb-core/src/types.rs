//! Core types for DecayDB

use crate::operators::Aggregate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp of an appended element, caller-defined units
pub type Timestamp = i64;

/// Window identifier, equal to the start timestamp of the window's span
pub type WindowId = Timestamp;

/// Absolute insertion sequence number within a stream (0-indexed)
pub type Count = u64;

/// Stream identifier
pub type StreamId = u64;

/// Value appended to a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Boolean
    Boolean(bool),
    /// String
    String(String),
}

impl Value {
    /// Get as f64 if possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// A compacted aggregate covering a contiguous count and time range.
///
/// Windows of one stream tile the count range `[0, N-1]`: the `ce` of a window is
/// exactly one less than the `cs` of its successor.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryWindow {
    /// Time span start (inclusive), also the window ID
    pub ts: Timestamp,
    /// Time span end (inclusive)
    pub te: Timestamp,
    /// Count span start (inclusive)
    pub cs: Count,
    /// Count span end (inclusive)
    pub ce: Count,
    /// One aggregate per registered operator
    pub aggregates: Vec<Aggregate>,
}

impl SummaryWindow {
    /// Create a window with the given spans and aggregates
    pub fn new(ts: Timestamp, te: Timestamp, cs: Count, ce: Count, aggregates: Vec<Aggregate>) -> Self {
        Self {
            ts,
            te,
            cs,
            ce,
            aggregates,
        }
    }

    /// Window ID
    pub fn id(&self) -> WindowId {
        self.ts
    }

    /// Number of elements covered
    pub fn size(&self) -> u64 {
        self.ce - self.cs + 1
    }

    /// Time range covered
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.ts, self.te)
    }
}

impl fmt::Display for SummaryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<summary-window: time range [{}:{}], count range [{}:{}], aggrs [",
            self.ts, self.te, self.cs, self.ce
        )?;
        for (i, aggr) in self.aggregates.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", aggr)?;
        }
        write!(f, "]>")
    }
}

/// Closed time interval used by the read path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if two ranges overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}
