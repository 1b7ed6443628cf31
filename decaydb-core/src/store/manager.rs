//! Per-stream window store facade

use super::{decode_window, encode_window, BackingStore};
use crate::operators::{Aggregate, Operators, WindowOperator};
use crate::{Count, DecayError, Result, StreamId, SummaryWindow, TimeRange, Timestamp, Value, WindowId};
use std::sync::Arc;
use tracing::trace;

/// Reads, writes and merges the windows of one stream
pub struct WindowManager {
    stream_id: StreamId,
    store: Arc<dyn BackingStore>,
    operators: Operators,
}

impl WindowManager {
    /// Create a manager for a stream
    pub fn new(stream_id: StreamId, store: Arc<dyn BackingStore>, operators: Operators) -> Self {
        Self {
            stream_id,
            store,
            operators,
        }
    }

    /// Stream this manager serves
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Registered operators, in aggregate order
    pub fn operators(&self) -> &[Box<dyn WindowOperator>] {
        &self.operators
    }

    /// Create a window with one empty aggregate per operator
    pub fn create_empty_window(&self, ts: Timestamp, te: Timestamp, cs: Count, ce: Count) -> SummaryWindow {
        let aggregates = self.operators.iter().map(|op| op.create_empty()).collect();
        SummaryWindow::new(ts, te, cs, ce, aggregates)
    }

    /// Insert one value into every aggregate of a window
    pub fn insert_into_window(&self, window: &mut SummaryWindow, ts: Timestamp, value: &Value) -> Result<()> {
        for (op, slot) in self.operators.iter().zip(window.aggregates.iter_mut()) {
            let aggr = std::mem::replace(slot, Aggregate::Long(0));
            *slot = op.insert(aggr, ts, value)?;
        }
        Ok(())
    }

    /// Get a window by ID
    pub fn get_window(&self, id: WindowId) -> Result<Option<SummaryWindow>> {
        match self.store.get(self.stream_id, id)? {
            Some(data) => Ok(Some(decode_window(&data, &self.operators)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a window
    pub fn put_window(&self, window: &SummaryWindow) -> Result<()> {
        let data = encode_window(window, &self.operators)?;
        self.store.put(self.stream_id, window.id(), data)
    }

    /// Delete a window, returning it if it existed
    pub fn delete_window(&self, id: WindowId) -> Result<Option<SummaryWindow>> {
        match self.store.delete(self.stream_id, id)? {
            Some(data) => Ok(Some(decode_window(&data, &self.operators)?)),
            None => Ok(None),
        }
    }

    /// Merge a chain of consecutive windows into the head window.
    ///
    /// The head absorbs the count and time spans of the tails, which are deleted
    /// after the head is written back.
    pub fn merge_windows(&self, head: WindowId, tails: &[WindowId]) -> Result<SummaryWindow> {
        let mut merged = self.load(head)?;
        let Some(&last) = tails.last() else {
            return Ok(merged);
        };

        let mut windows = Vec::with_capacity(tails.len());
        for &id in tails {
            windows.push(self.load(id)?);
        }

        let mut columns: Vec<Vec<Aggregate>> = merged
            .aggregates
            .drain(..)
            .map(|aggr| {
                let mut column = Vec::with_capacity(windows.len() + 1);
                column.push(aggr);
                column
            })
            .collect();
        for window in &mut windows {
            for (column, aggr) in columns.iter_mut().zip(window.aggregates.drain(..)) {
                column.push(aggr);
            }
        }
        merged.aggregates = self
            .operators
            .iter()
            .zip(columns)
            .map(|(op, column)| op.merge(column))
            .collect::<Result<Vec<_>>>()?;

        let tail_end = windows.last().map(|w| (w.ce, w.te));
        if let Some((ce, te)) = tail_end {
            merged.ce = ce;
            merged.te = te;
        }
        self.put_window(&merged)?;
        for &id in tails {
            self.store.delete(self.stream_id, id)?;
        }
        trace!(
            "Stream {}: merged {} windows into {} (through {})",
            self.stream_id,
            tails.len(),
            head,
            last
        );
        Ok(merged)
    }

    /// Windows whose time span intersects `[t0, t1]`, oldest first
    pub fn get_windows_overlapping(&self, t0: Timestamp, t1: Timestamp) -> Result<Vec<SummaryWindow>> {
        if t0 > t1 {
            return Ok(Vec::new());
        }
        let range = TimeRange::new(t0, t1);
        let mut windows = Vec::new();
        // the window starting at or before t0 may still span into the range
        if let Some((id, data)) = self.store.floor(self.stream_id, t0)? {
            let window = decode_window(&data, &self.operators)?;
            if id < t0 && window.time_range().overlaps(&range) {
                windows.push(window);
            }
        }
        for (_, data) in self.store.scan(self.stream_id, t0, t1)? {
            windows.push(decode_window(&data, &self.operators)?);
        }
        Ok(windows)
    }

    /// Every window of the stream, oldest first
    pub fn all_windows(&self) -> Result<Vec<SummaryWindow>> {
        self.get_windows_overlapping(Timestamp::MIN, Timestamp::MAX)
    }

    /// Number of windows stored for the stream
    pub fn num_windows(&self) -> Result<u64> {
        self.store.num_windows(self.stream_id)
    }

    /// Flush the backing store
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    fn load(&self, id: WindowId) -> Result<SummaryWindow> {
        self.get_window(id)?.ok_or_else(|| {
            DecayError::Corruption(format!("stream {} has no window {}", self.stream_id, id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{CountOperator, MaxOperator, SumOperator};
    use crate::store::MemoryBackingStore;

    fn manager(store: Arc<dyn BackingStore>, stream: StreamId) -> WindowManager {
        let operators: Vec<Box<dyn WindowOperator>> = vec![
            Box::new(CountOperator),
            Box::new(SumOperator),
            Box::new(MaxOperator),
        ];
        WindowManager::new(stream, store, Arc::new(operators))
    }

    /// Singleton windows with timestamps 10, 20, 30, ... and value = count
    fn populate(manager: &WindowManager, n: u64) {
        for c in 0..n {
            let ts = (c as i64 + 1) * 10;
            let mut window = manager.create_empty_window(ts, ts, c, c);
            manager.insert_into_window(&mut window, ts, &Value::from(c as i64)).unwrap();
            manager.put_window(&window).unwrap();
        }
    }

    #[test]
    fn test_put_get_delete() {
        let manager = manager(Arc::new(MemoryBackingStore::new()), 1);
        populate(&manager, 3);
        assert_eq!(manager.num_windows().unwrap(), 3);

        let w = manager.get_window(20).unwrap().unwrap();
        assert_eq!((w.cs, w.ce), (1, 1));
        assert_eq!(w.aggregates, vec![Aggregate::Long(1), Aggregate::Long(1), Aggregate::Long(1)]);

        let deleted = manager.delete_window(20).unwrap().unwrap();
        assert_eq!(deleted, w);
        assert!(manager.get_window(20).unwrap().is_none());
        assert!(manager.delete_window(20).unwrap().is_none());
    }

    #[test]
    fn test_merge_windows() {
        let manager = manager(Arc::new(MemoryBackingStore::new()), 1);
        populate(&manager, 5);

        let merged = manager.merge_windows(20, &[30, 40]).unwrap();
        assert_eq!((merged.ts, merged.te, merged.cs, merged.ce), (20, 40, 1, 3));
        assert_eq!(
            merged.aggregates,
            vec![Aggregate::Long(3), Aggregate::Long(6), Aggregate::Long(3)]
        );

        let ids: Vec<_> = manager.all_windows().unwrap().iter().map(|w| w.id()).collect();
        assert_eq!(ids, vec![10, 20, 50]);
        assert_eq!(manager.get_window(20).unwrap().unwrap(), merged);

        // merging nothing leaves the head untouched
        assert_eq!(manager.merge_windows(10, &[]).unwrap().size(), 1);
        assert!(manager.merge_windows(10, &[99]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_get_windows_overlapping() {
        let manager = manager(Arc::new(MemoryBackingStore::new()), 1);
        populate(&manager, 6);
        manager.merge_windows(20, &[30, 40]).unwrap();

        let ids = |t0, t1| -> Vec<WindowId> {
            manager
                .get_windows_overlapping(t0, t1)
                .unwrap()
                .iter()
                .map(|w| w.id())
                .collect()
        };
        assert_eq!(ids(35, 55), vec![20, 50]);
        assert_eq!(ids(20, 20), vec![20]);
        assert_eq!(ids(41, 49), Vec::<WindowId>::new());
        assert_eq!(ids(0, 100), vec![10, 20, 50, 60]);
        assert_eq!(ids(60, 0), Vec::<WindowId>::new());
    }

    #[test]
    fn test_streams_share_store() {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryBackingStore::new());
        let a = manager(store.clone(), 1);
        let b = manager(store, 2);
        populate(&a, 4);
        populate(&b, 2);
        assert_eq!(a.num_windows().unwrap(), 4);
        assert_eq!(b.num_windows().unwrap(), 2);
        b.merge_windows(10, &[20]).unwrap();
        assert_eq!(a.num_windows().unwrap(), 4);
        assert_eq!(b.num_windows().unwrap(), 1);
    }
}
