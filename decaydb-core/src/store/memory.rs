//! In-memory backing store

use super::BackingStore;
use crate::{Result, StreamId, WindowId};
use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free ordered map of encoded windows, shared by all streams
pub struct MemoryBackingStore {
    windows: SkipMap<(StreamId, WindowId), Bytes>,
    size_bytes: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub entries: u64,
    pub size_bytes: u64,
    pub puts: u64,
    pub deletes: u64,
}

impl MemoryBackingStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            windows: SkipMap::new(),
            size_bytes: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Get store statistics
    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            entries: self.windows.len() as u64,
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for MemoryBackingStore {
    fn get(&self, stream: StreamId, id: WindowId) -> Result<Option<Bytes>> {
        Ok(self.windows.get(&(stream, id)).map(|e| e.value().clone()))
    }

    fn put(&self, stream: StreamId, id: WindowId, data: Bytes) -> Result<()> {
        self.size_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        self.puts.fetch_add(1, Ordering::Relaxed);
        // each key is written by one stream's pipeline only
        if let Some(old) = self.windows.get(&(stream, id)) {
            self.size_bytes.fetch_sub(old.value().len() as u64, Ordering::Relaxed);
        }
        self.windows.insert((stream, id), data);
        Ok(())
    }

    fn delete(&self, stream: StreamId, id: WindowId) -> Result<Option<Bytes>> {
        let removed = self.windows.remove(&(stream, id)).map(|e| e.value().clone());
        if let Some(data) = &removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            self.size_bytes.fetch_sub(data.len() as u64, Ordering::Relaxed);
        }
        Ok(removed)
    }

    fn scan(&self, stream: StreamId, start: WindowId, end: WindowId) -> Result<Vec<(WindowId, Bytes)>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .windows
            .range((stream, start)..=(stream, end))
            .map(|e| (e.key().1, e.value().clone()))
            .collect())
    }

    fn floor(&self, stream: StreamId, id: WindowId) -> Result<Option<(WindowId, Bytes)>> {
        Ok(self
            .windows
            .range((stream, WindowId::MIN)..=(stream, id))
            .next_back()
            .map(|e| (e.key().1, e.value().clone())))
    }

    fn num_windows(&self, stream: StreamId) -> Result<u64> {
        Ok(self
            .windows
            .range((stream, WindowId::MIN)..=(stream, WindowId::MAX))
            .count() as u64)
    }
}
