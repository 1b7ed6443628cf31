//! Aggregate operators
//!
//! A [`WindowOperator`] manages aggregate objects; it is not an aggregate itself.
//! Each stream registers an ordered list of operators and every [`SummaryWindow`]
//! carries one [`Aggregate`] per operator, in the same order.
//!
//! [`SummaryWindow`]: crate::SummaryWindow

mod simple;

pub use simple::{CountOperator, MaxOperator, SumOperator};

use crate::{DecayError, Result, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Ordered operator list shared by every stage of one stream
pub type Operators = Arc<Vec<Box<dyn WindowOperator>>>;

/// Operator kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    Count,
    Sum,
    Max,
}

/// Opaque aggregate state held by a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Aggregate {
    /// Integer-valued state (counts, integer sums, maxima)
    Long(i64),
    /// Floating point state
    Double(f64),
    /// Operator-defined encoded structure (sketches, filters)
    Blob(Vec<u8>),
}

impl Aggregate {
    /// Get as i64 if this is a long aggregate
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Aggregate::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as f64 if numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Aggregate::Long(v) => Some(*v as f64),
            Aggregate::Double(v) => Some(*v),
            Aggregate::Blob(_) => None,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Long(v) => write!(f, "{}", v),
            Aggregate::Double(v) => write!(f, "{}", v),
            Aggregate::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Contract for the pluggable per-window aggregate structures
pub trait WindowOperator: Send + Sync + fmt::Debug {
    /// Operator kind
    fn op_type(&self) -> OpType;

    /// Create an aggregate containing zero elements
    fn create_empty(&self) -> Aggregate;

    /// Insert a value and return the updated aggregate
    fn insert(&self, aggr: Aggregate, timestamp: Timestamp, value: &Value) -> Result<Aggregate>;

    /// Union a sequence of aggregates into one. Must be associative and commutative.
    fn merge(&self, aggrs: Vec<Aggregate>) -> Result<Aggregate>;

    /// Encode an aggregate for storage
    fn serialize(&self, aggr: &Aggregate) -> Result<Vec<u8>> {
        Ok(bincode::serialize(aggr)?)
    }

    /// Decode an aggregate produced by [`WindowOperator::serialize`]
    fn deserialize(&self, bytes: &[u8]) -> Result<Aggregate> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn expect_long(op: OpType, aggr: &Aggregate) -> Result<i64> {
    aggr.as_long().ok_or_else(|| {
        DecayError::Corruption(format!("{:?} operator expected a long aggregate, got {:?}", op, aggr))
    })
}

/// Find the index of the first operator of the given type
pub fn operator_index(operators: &[Box<dyn WindowOperator>], op_type: OpType) -> Option<usize> {
    operators.iter().position(|op| op.op_type() == op_type)
}
