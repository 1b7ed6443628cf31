//! Window storage
//!
//! A [`BackingStore`] holds encoded windows keyed by `(stream, window id)` and is
//! shared by every stream in a process. [`WindowManager`] is the per-stream facade
//! the pipeline talks to: it owns the operator list, encodes and decodes windows,
//! and implements merges and the time-range read path on top of the backing store.

mod codec;
mod manager;
mod memory;

pub use codec::{decode_window, encode_window};
pub use manager::WindowManager;
pub use memory::MemoryBackingStore;

use crate::{Result, StreamId, WindowId};
use bytes::Bytes;

/// Key-value contract for persisted windows.
///
/// Every call is one round-trip; caching is the implementation's concern. Errors
/// are returned as-is to the pipeline, which never retries.
pub trait BackingStore: Send + Sync {
    /// Get an encoded window
    fn get(&self, stream: StreamId, id: WindowId) -> Result<Option<Bytes>>;

    /// Insert or replace an encoded window
    fn put(&self, stream: StreamId, id: WindowId, data: Bytes) -> Result<()>;

    /// Remove a window, returning its previous encoding
    fn delete(&self, stream: StreamId, id: WindowId) -> Result<Option<Bytes>>;

    /// Windows with `start <= id <= end`, in ascending id order
    fn scan(&self, stream: StreamId, start: WindowId, end: WindowId) -> Result<Vec<(WindowId, Bytes)>>;

    /// The window with the greatest id `<= id`
    fn floor(&self, stream: StreamId, id: WindowId) -> Result<Option<(WindowId, Bytes)>>;

    /// Number of windows stored for a stream
    fn num_windows(&self, stream: StreamId) -> Result<u64>;

    /// Make previous writes durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
