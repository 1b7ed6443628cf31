//! Error types for DecayDB

use crate::types::{StreamId, Timestamp};
use thiserror::Error;

/// Result type alias for DecayDB operations
pub type Result<T> = std::result::Result<T, DecayError>;

/// DecayDB error types
#[derive(Error, Debug, Clone)]
pub enum DecayError {
    /// Backing store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Stored window could not be decoded
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch on a stored window
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Window record or aggregate encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Append with a timestamp that is not strictly increasing
    #[error("Out-of-order append in stream {stream}: ts = {timestamp}, last = {last}")]
    OutOfOrder {
        stream: StreamId,
        timestamp: Timestamp,
        last: Timestamp,
    },

    /// Value rejected by an ingest buffer or operator
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Merge index lost track of a window adjacency
    #[error("Merge invariant violated: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker stage terminated after an earlier failure
    #[error("Pipeline stage {stage} failed: {reason}")]
    PipelineFailed { stage: &'static str, reason: String },

    /// Operation on a pipeline that has already been closed
    #[error("Pipeline closed")]
    PipelineClosed,
}

impl DecayError {
    /// Check if error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, DecayError::Store(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DecayError::Corruption(_) | DecayError::ChecksumMismatch { .. }
        )
    }

    /// Check if error means the window partition can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecayError::InvariantViolation(_))
    }
}

impl From<bincode::Error> for DecayError {
    fn from(e: bincode::Error) -> Self {
        DecayError::Serialization(e.to_string())
    }
}
