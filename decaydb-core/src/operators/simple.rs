//! Count, sum and max operators

use super::{expect_long, Aggregate, OpType, WindowOperator};
use crate::{DecayError, Result, Timestamp, Value};

/// Counts elements
#[derive(Debug, Default, Clone, Copy)]
pub struct CountOperator;

impl WindowOperator for CountOperator {
    fn op_type(&self) -> OpType {
        OpType::Count
    }

    fn create_empty(&self) -> Aggregate {
        Aggregate::Long(0)
    }

    fn insert(&self, aggr: Aggregate, _timestamp: Timestamp, _value: &Value) -> Result<Aggregate> {
        Ok(Aggregate::Long(expect_long(OpType::Count, &aggr)? + 1))
    }

    fn merge(&self, aggrs: Vec<Aggregate>) -> Result<Aggregate> {
        let mut total = 0;
        for aggr in &aggrs {
            total += expect_long(OpType::Count, aggr)?;
        }
        Ok(Aggregate::Long(total))
    }
}

/// Sums numeric values. Stays integral until a float is seen or the integer sum overflows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SumOperator;

impl WindowOperator for SumOperator {
    fn op_type(&self) -> OpType {
        OpType::Sum
    }

    fn create_empty(&self) -> Aggregate {
        Aggregate::Long(0)
    }

    fn insert(&self, aggr: Aggregate, _timestamp: Timestamp, value: &Value) -> Result<Aggregate> {
        match (aggr, value) {
            (Aggregate::Long(sum), Value::Integer(v)) => Ok(match sum.checked_add(*v) {
                Some(sum) => Aggregate::Long(sum),
                None => Aggregate::Double(sum as f64 + *v as f64),
            }),
            (Aggregate::Long(sum), Value::Float(v)) => Ok(Aggregate::Double(sum as f64 + v)),
            (Aggregate::Double(sum), v) => match v.as_f64() {
                Some(v) => Ok(Aggregate::Double(sum + v)),
                None => Err(DecayError::InvalidValue(format!("cannot sum {:?}", v))),
            },
            (Aggregate::Long(_), v) => Err(DecayError::InvalidValue(format!("cannot sum {:?}", v))),
            (aggr, _) => Err(DecayError::Corruption(format!("sum operator got {:?}", aggr))),
        }
    }

    fn merge(&self, aggrs: Vec<Aggregate>) -> Result<Aggregate> {
        let mut long_sum = 0i64;
        let mut double_sum = 0f64;
        let mut integral = true;
        for aggr in aggrs {
            match aggr {
                Aggregate::Long(v) => match long_sum.checked_add(v) {
                    Some(sum) => long_sum = sum,
                    None => {
                        integral = false;
                        double_sum += v as f64;
                    }
                },
                Aggregate::Double(v) => {
                    integral = false;
                    double_sum += v;
                }
                other => {
                    return Err(DecayError::Corruption(format!("sum operator got {:?}", other)));
                }
            }
        }
        if integral {
            Ok(Aggregate::Long(long_sum))
        } else {
            Ok(Aggregate::Double(long_sum as f64 + double_sum))
        }
    }
}

/// Maximum of integer values
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxOperator;

impl MaxOperator {
    /// Max over the empty set
    pub const EMPTY_MAX: i64 = i64::MIN;
}

impl WindowOperator for MaxOperator {
    fn op_type(&self) -> OpType {
        OpType::Max
    }

    fn create_empty(&self) -> Aggregate {
        Aggregate::Long(Self::EMPTY_MAX)
    }

    fn insert(&self, aggr: Aggregate, _timestamp: Timestamp, value: &Value) -> Result<Aggregate> {
        let current = expect_long(OpType::Max, &aggr)?;
        match value {
            Value::Integer(v) => Ok(Aggregate::Long(current.max(*v))),
            other => Err(DecayError::InvalidValue(format!("max needs integers, got {:?}", other))),
        }
    }

    fn merge(&self, aggrs: Vec<Aggregate>) -> Result<Aggregate> {
        let mut max = Self::EMPTY_MAX;
        for aggr in &aggrs {
            max = max.max(expect_long(OpType::Max, aggr)?);
        }
        Ok(Aggregate::Long(max))
    }
}
