//! Merge scheduling
//!
//! The merger tracks the count range of every live window and forecasts, for each
//! adjacent pair, the element count at which the decay function first places both
//! in one window. Forecasts live in an ordered set keyed by `(merge count, window)`,
//! which doubles as a min-heap with arbitrary deletion. Due merges are chained per
//! surviving window and issued to the store in batches.

use super::barrier::{FlushBarrier, Stage};
use super::message::{MergeNotice, StageMessage};
use super::PipelineCounters;
use crate::store::WindowManager;
use crate::windowing::Windowing;
use crate::{Count, DecayError, Result, StreamId, WindowId};
use crossbeam_channel::Receiver;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    /// Last count position covered by the window
    c_end: Count,
    /// Forecast merge count, mirrored in the heap
    scheduled: Option<Count>,
}

/// Chain length statistics over issued merges
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeChainStats {
    /// Number of chains issued
    pub chains: u64,
    /// Shortest chain (windows absorbed by one head)
    pub min: u64,
    /// Longest chain
    pub max: u64,
    /// Windows absorbed over all chains
    pub total: u64,
}

impl MergeChainStats {
    fn record(&mut self, length: u64) {
        if self.chains == 0 || length < self.min {
            self.min = length;
        }
        self.max = self.max.max(length);
        self.chains += 1;
        self.total += length;
    }

    /// Mean chain length
    pub fn mean(&self) -> f64 {
        if self.chains == 0 {
            0.0
        } else {
            self.total as f64 / self.chains as f64
        }
    }
}

/// Store-free merge schedule: window index, merge heap and pending chains
pub(crate) struct MergeScheduler {
    windowing: Box<dyn Windowing>,
    n: Count,
    index: BTreeMap<WindowId, IndexEntry>,
    heap: BTreeSet<(Count, WindowId)>,
    /// Surviving window -> windows chained to be merged into it, oldest first
    pending: BTreeMap<WindowId, Vec<WindowId>>,
    last_window: Option<WindowId>,
}

impl MergeScheduler {
    pub(crate) fn new(windowing: Box<dyn Windowing>) -> Self {
        Self {
            windowing,
            n: 0,
            index: BTreeMap::new(),
            heap: BTreeSet::new(),
            pending: BTreeMap::new(),
            last_window: None,
        }
    }

    /// Elements covered by all windows seen so far
    pub(crate) fn count(&self) -> Count {
        self.n
    }

    /// Live windows, counting those whose merge is not yet issued as absorbed
    pub(crate) fn num_windows(&self) -> usize {
        self.index.len()
    }

    /// Windows absorbed into a chain but not yet merged in the store
    pub(crate) fn num_pending(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Account for a newly written window and run every merge that is now due
    pub(crate) fn on_window_created(&mut self, id: WindowId, size: u64) -> Result<()> {
        if let Some(last) = self.last_window {
            if id <= last {
                return Err(DecayError::InvariantViolation(format!(
                    "window {} created after newer window {}",
                    id, last
                )));
            }
        }
        self.n += size;
        self.index.insert(
            id,
            IndexEntry {
                c_end: self.n - 1,
                scheduled: None,
            },
        );
        // the previous newest window now has a merge partner
        if let Some(last) = self.last_window.replace(id) {
            self.update_merge(last, id)?;
        }
        self.drain()
    }

    /// Take the accumulated merge chains
    pub(crate) fn take_pending(&mut self) -> BTreeMap<WindowId, Vec<WindowId>> {
        std::mem::take(&mut self.pending)
    }

    fn count_start(&self, id: WindowId) -> Count {
        self.index
            .range(..id)
            .next_back()
            .map(|(_, entry)| entry.c_end + 1)
            .unwrap_or(0)
    }

    fn successor(&self, id: WindowId) -> Option<WindowId> {
        self.index
            .range((Excluded(id), Unbounded))
            .next()
            .map(|(&id, _)| id)
    }

    fn predecessor(&self, id: WindowId) -> Option<WindowId> {
        self.index.range(..id).next_back().map(|(&id, _)| id)
    }

    /// Recompute the forecast for the adjacent pair `(w0, w1)`
    fn update_merge(&mut self, w0: WindowId, w1: WindowId) -> Result<()> {
        let c_start = self.count_start(w0);
        let c_end = self
            .index
            .get(&w1)
            .map(|entry| entry.c_end)
            .ok_or_else(|| DecayError::InvariantViolation(format!("window {} is not indexed", w1)))?;
        let entry = self
            .index
            .get_mut(&w0)
            .ok_or_else(|| DecayError::InvariantViolation(format!("window {} is not indexed", w0)))?;

        if let Some(old) = entry.scheduled.take() {
            self.heap.remove(&(old, w0));
        }
        if let Some(due) = self.windowing.first_containing_time(c_start, c_end, self.n) {
            trace!("Window {} forecast to absorb {} at count {}", w0, w1, due);
            entry.scheduled = Some(due);
            self.heap.insert((due, w0));
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        while let Some((due, w0)) = self.heap.first().copied() {
            if due > self.n {
                break;
            }
            self.heap.remove(&(due, w0));
            if let Some(entry) = self.index.get_mut(&w0) {
                entry.scheduled = None;
            }

            let w1 = self.successor(w0).ok_or_else(|| {
                DecayError::InvariantViolation(format!("window {} is due to merge but has no successor", w0))
            })?;
            let wm1 = self.predecessor(w0);
            let w2 = self.successor(w1);

            let absorbed = self
                .index
                .remove(&w1)
                .ok_or_else(|| DecayError::InvariantViolation(format!("window {} vanished", w1)))?;
            if let Some(old) = absorbed.scheduled {
                self.heap.remove(&(old, w1));
            }
            let mut chained = self.pending.remove(&w1).unwrap_or_default();
            let chain = self.pending.entry(w0).or_default();
            chain.push(w1);
            chain.append(&mut chained);

            let head = self
                .index
                .get_mut(&w0)
                .ok_or_else(|| DecayError::InvariantViolation(format!("window {} vanished", w0)))?;
            head.c_end = absorbed.c_end;
            if self.last_window == Some(w1) {
                self.last_window = Some(w0);
            }

            if let Some(wm1) = wm1 {
                self.update_merge(wm1, w0)?;
            }
            if let Some(w2) = w2 {
                self.update_merge(w0, w2)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn windows(&self) -> Vec<(WindowId, Count, Count, Option<Count>)> {
        let mut c_start = 0;
        self.index
            .iter()
            .map(|(&id, entry)| {
                let window = (id, c_start, entry.c_end, entry.scheduled);
                c_start = entry.c_end + 1;
                window
            })
            .collect()
    }
}

/// Merger stage: applies notifications to the schedule and issues merge batches
pub(crate) struct Merger {
    stream_id: StreamId,
    scheduler: MergeScheduler,
    manager: Arc<WindowManager>,
    windows_per_merge_batch: u64,
    windows_since_issue: u64,
    parallelize_merge: bool,
    chain_stats: MergeChainStats,
    counters: Arc<PipelineCounters>,
}

impl Merger {
    pub(crate) fn new(
        windowing: Box<dyn Windowing>,
        manager: Arc<WindowManager>,
        windows_per_merge_batch: u64,
        parallelize_merge: bool,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            stream_id: manager.stream_id(),
            scheduler: MergeScheduler::new(windowing),
            manager,
            windows_per_merge_batch: windows_per_merge_batch.max(1),
            windows_since_issue: 0,
            parallelize_merge,
            chain_stats: MergeChainStats::default(),
            counters,
        }
    }

    /// Stage loop, run on the merger thread
    pub(crate) fn run(mut self, rx: Receiver<StageMessage<MergeNotice>>, barrier: Arc<FlushBarrier>) {
        for msg in rx.iter() {
            match self.process(msg, &barrier) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    barrier.fail(Stage::Merger, e);
                    break;
                }
            }
        }
        debug!("Stream {}: merger stopped at count {}", self.stream_id, self.scheduler.count());
    }

    fn process(&mut self, msg: StageMessage<MergeNotice>, barrier: &FlushBarrier) -> Result<bool> {
        match msg {
            StageMessage::Data(notice) => {
                self.scheduler.on_window_created(notice.id, notice.size)?;
                self.windows_since_issue += 1;
                if self.windows_since_issue >= self.windows_per_merge_batch {
                    self.issue_merges()?;
                }
                self.publish_counters();
            }
            StageMessage::Flush(ticket) => {
                self.issue_merges()?;
                self.publish_counters();
                barrier.ack(Stage::Merger, ticket);
            }
            StageMessage::Shutdown(ticket) => {
                self.issue_merges()?;
                self.publish_counters();
                info!(
                    "Stream {}: merger shutting down, {} windows over {} elements, merge chains: count {} min {} max {} mean {:.2}",
                    self.stream_id,
                    self.scheduler.num_windows(),
                    self.scheduler.count(),
                    self.chain_stats.chains,
                    self.chain_stats.min,
                    self.chain_stats.max,
                    self.chain_stats.mean()
                );
                barrier.ack(Stage::Merger, ticket);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn issue_merges(&mut self) -> Result<()> {
        self.windows_since_issue = 0;
        let pending = self.scheduler.take_pending();
        if pending.is_empty() {
            return Ok(());
        }
        debug!("Stream {}: issuing {} merge chains", self.stream_id, pending.len());
        if self.parallelize_merge {
            // chains touch disjoint windows
            let manager = &self.manager;
            let chains: Vec<(WindowId, Vec<WindowId>)> = pending.into_iter().collect();
            let results: Vec<Result<()>> = chains
                .par_iter()
                .map(|(head, tails)| manager.merge_windows(*head, tails).map(drop))
                .collect();
            for ((_, tails), result) in chains.iter().zip(results) {
                result?;
                self.record_chain(tails.len() as u64);
            }
        } else {
            for (head, tails) in pending {
                self.manager.merge_windows(head, &tails)?;
                self.record_chain(tails.len() as u64);
            }
        }
        Ok(())
    }

    fn record_chain(&mut self, length: u64) {
        self.chain_stats.record(length);
        self.counters.merges_issued.fetch_add(1, Ordering::Relaxed);
    }

    fn publish_counters(&self) {
        self.counters
            .live_windows
            .store(self.scheduler.num_windows() as u64, Ordering::Relaxed);
        self.counters
            .unissued_merges
            .store(self.scheduler.num_pending() as u64, Ordering::Relaxed);
    }
}
