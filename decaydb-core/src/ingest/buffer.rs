//! Reusable ingest buffers

use crate::{Count, DecayError, Result, Timestamp, Value};
use std::borrow::Cow;

#[derive(Debug)]
enum ValueColumn {
    Longs(Vec<i64>),
    Values(Vec<Value>),
}

/// Fixed-capacity column buffer of (timestamp, value) pairs.
///
/// Buffers are allocated once per pipeline and recycled through the buffer pool.
/// Each buffer remembers the absolute count of its first element, so a partially
/// consumed buffer still knows exactly where its remaining elements belong.
#[derive(Debug)]
pub struct IngestBuffer {
    timestamps: Vec<Timestamp>,
    values: ValueColumn,
    capacity: usize,
    start_count: Count,
}

impl IngestBuffer {
    /// Create an empty buffer. Long buffers store integers in a primitive column.
    pub fn new(capacity: usize, values_are_longs: bool) -> Self {
        let values = if values_are_longs {
            ValueColumn::Longs(Vec::with_capacity(capacity))
        } else {
            ValueColumn::Values(Vec::with_capacity(capacity))
        };
        Self {
            timestamps: Vec::with_capacity(capacity),
            values,
            capacity,
            start_count: 0,
        }
    }

    /// Append an element. Long buffers reject non-integer values without mutating.
    pub fn append(&mut self, ts: Timestamp, value: Value) -> Result<()> {
        debug_assert!(!self.is_full());
        match (&mut self.values, value) {
            (ValueColumn::Longs(column), Value::Integer(v)) => column.push(v),
            (ValueColumn::Longs(_), other) => {
                return Err(DecayError::InvalidValue(format!(
                    "long-valued buffer cannot hold {:?}",
                    other
                )));
            }
            (ValueColumn::Values(column), v) => column.push(v),
        }
        self.timestamps.push(ts);
        Ok(())
    }

    /// Number of buffered elements
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Check if the buffer reached its capacity
    pub fn is_full(&self) -> bool {
        self.timestamps.len() >= self.capacity
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Absolute count of the first buffered element
    pub fn start_count(&self) -> Count {
        self.start_count
    }

    /// Timestamp at a buffer position
    pub fn timestamp(&self, i: usize) -> Timestamp {
        self.timestamps[i]
    }

    /// Value at a buffer position
    pub fn value(&self, i: usize) -> Cow<'_, Value> {
        match &self.values {
            ValueColumn::Longs(column) => Cow::Owned(Value::Integer(column[i])),
            ValueColumn::Values(column) => Cow::Borrowed(&column[i]),
        }
    }

    /// Drop the first `n` elements, shifting the rest to the front
    pub fn truncate_head(&mut self, n: usize) {
        let n = n.min(self.len());
        self.timestamps.drain(..n);
        match &mut self.values {
            ValueColumn::Longs(column) => {
                column.drain(..n);
            }
            ValueColumn::Values(column) => {
                column.drain(..n);
            }
        }
        self.start_count += n as Count;
    }

    /// Empty the buffer for reuse starting at the given absolute count
    pub fn reset(&mut self, start_count: Count) {
        self.timestamps.clear();
        match &mut self.values {
            ValueColumn::Longs(column) => column.clear(),
            ValueColumn::Values(column) => column.clear(),
        }
        self.start_count = start_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_until_full() {
        let mut buffer = IngestBuffer::new(3, false);
        buffer.reset(10);
        assert!(buffer.is_empty());
        buffer.append(1, Value::from("a")).unwrap();
        buffer.append(2, Value::from(2.5)).unwrap();
        assert!(!buffer.is_full());
        buffer.append(3, Value::from(7i64)).unwrap();
        assert!(buffer.is_full());

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.start_count(), 10);
        assert_eq!(buffer.timestamp(1), 2);
        assert_eq!(*buffer.value(0), Value::from("a"));
    }

    #[test]
    fn test_long_buffer_rejects_non_integers() {
        let mut buffer = IngestBuffer::new(4, true);
        buffer.append(1, Value::from(5i64)).unwrap();
        let err = buffer.append(2, Value::from(1.5)).unwrap_err();
        assert!(matches!(err, DecayError::InvalidValue(_)));
        assert_eq!(buffer.len(), 1);
        assert_eq!(*buffer.value(0), Value::Integer(5));
    }

    #[test]
    fn test_truncate_head_tracks_counts() {
        let mut buffer = IngestBuffer::new(8, true);
        buffer.reset(100);
        for i in 0..5 {
            buffer.append(i * 10, Value::from(i)).unwrap();
        }
        buffer.truncate_head(3);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.start_count(), 103);
        assert_eq!(buffer.timestamp(0), 30);
        assert_eq!(*buffer.value(1), Value::Integer(4));

        buffer.reset(0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.start_count(), 0);
        assert_eq!(buffer.capacity(), 8);
    }
}
