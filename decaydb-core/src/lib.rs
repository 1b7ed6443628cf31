//! DecayDB Core - Time-Decayed Stream Summarization Engine
//!
//! Summarizes unbounded streams of timestamped values into a bounded number of
//! windows whose sizes grow with age:
//! - Recent data kept at fine granularity, old data compacted into coarse windows
//! - Pluggable decay functions (exponential, rational power, or any length sequence)
//! - Pluggable per-window aggregates (count, sum, max, ...)
//!
//! # Architecture
//!
//! Each stream runs a window-based merge-histogram (WBMH) pipeline:
//!
//! - **Ingester**: buffers appends in the caller's thread
//! - **Summarizer**: cuts full buffers into decay-shaped windows
//! - **Writer**: persists windows through the window store
//! - **Merger**: schedules and issues the merges that keep windows decayed

pub mod ingest;
pub mod operators;
pub mod store;
pub mod windowing;

mod error;
mod types;

pub use error::{DecayError, Result};
pub use ingest::{IngestConfig, PipelineStats, WbmhPipeline};
pub use types::*;

/// DecayDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Bound of the writer and merger queues
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

    /// Buffers in an ingest buffer pool
    pub const DEFAULT_NUM_INGEST_BUFFERS: usize = 2;

    /// Raw windows between merge batches
    pub const DEFAULT_WINDOWS_PER_MERGE_BATCH: u64 = 1;

    /// Appended elements between progress log lines
    pub const PROGRESS_LOG_INTERVAL: u64 = 100_000_000;
}
