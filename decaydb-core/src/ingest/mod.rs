//! Ingest pipeline
//!
//! Appends flow through four stages connected by bounded queues:
//!
//! - **Ingester** (caller thread): fills pooled [`IngestBuffer`]s
//! - **Summarizer**: cuts full buffers into windows shaped like the decay function
//! - **Writer**: persists windows and announces them to the merger in count order
//! - **Merger**: forecasts and performs the merges that keep the window sizes decayed
//!
//! Without buffering the first two stages are bypassed and each element becomes a
//! single-element window in the caller thread. `flush` and `close` inject markers
//! through every stage and wait on a shared [`FlushBarrier`] until all of them
//! acknowledge.

mod barrier;
mod buffer;
mod ingester;
mod merger;
mod message;
mod summarizer;
mod writer;

pub use buffer::IngestBuffer;
pub use merger::MergeChainStats;

use crate::config::{
    DEFAULT_MAX_QUEUE_SIZE, DEFAULT_NUM_INGEST_BUFFERS, DEFAULT_WINDOWS_PER_MERGE_BATCH,
    PROGRESS_LOG_INTERVAL,
};
use crate::store::WindowManager;
use crate::windowing::Windowing;
use crate::{DecayError, Result, StreamId, Timestamp, Value};
use barrier::{FlushBarrier, Stage};
use ingester::{BufferPool, Ingester};
use merger::Merger;
use message::Marker;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use summarizer::Summarizer;
use tracing::{info, warn};
use writer::Writer;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Total values buffered across all buffers; 0 appends unbuffered
    pub ingest_buffer_size: u64,
    /// Buffers in the pool
    pub num_ingest_buffers: usize,
    /// Raw windows between merge batches
    pub windows_per_merge_batch: u64,
    /// Store buffered values in a primitive integer column
    pub values_are_longs: bool,
    /// Bound of the writer and merger queues
    pub max_queue_size: usize,
    /// Issue independent merge chains of one batch in parallel
    pub parallelize_merge: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ingest_buffer_size: 0,
            num_ingest_buffers: DEFAULT_NUM_INGEST_BUFFERS,
            windows_per_merge_batch: DEFAULT_WINDOWS_PER_MERGE_BATCH,
            values_are_longs: false,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            parallelize_merge: false,
        }
    }
}

impl IngestConfig {
    /// Buffered configuration with `num_ingest_buffers` buffers sharing `ingest_buffer_size` values
    pub fn buffered(ingest_buffer_size: u64, num_ingest_buffers: usize) -> Self {
        Self {
            ingest_buffer_size,
            num_ingest_buffers,
            ..Self::default()
        }
    }

    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.windows_per_merge_batch == 0 {
            return Err(DecayError::Config("windows_per_merge_batch must be at least 1".into()));
        }
        if self.max_queue_size == 0 {
            return Err(DecayError::Config("max_queue_size must be at least 1".into()));
        }
        if self.ingest_buffer_size > 0 && self.num_ingest_buffers == 0 {
            return Err(DecayError::Config(
                "num_ingest_buffers must be at least 1 when buffering".into(),
            ));
        }
        Ok(())
    }
}

/// Counters shared between the caller and the merger thread
#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    pub(crate) elements_appended: AtomicU64,
    pub(crate) live_windows: AtomicU64,
    pub(crate) unissued_merges: AtomicU64,
    pub(crate) merges_issued: AtomicU64,
}

/// Point-in-time pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub stream_id: StreamId,
    pub elements_appended: u64,
    /// Per-buffer capacity; 0 when unbuffered
    pub buffer_capacity: u64,
    pub writer_queue_depth: usize,
    pub merger_queue_depth: usize,
    pub free_buffers: usize,
    /// Windows chained for merging but not yet merged in the store
    pub unissued_merges: u64,
    /// Windows tracked by the merger
    pub live_windows: u64,
    /// Store-level merges performed
    pub merges_issued: u64,
}

/// Window-based merge-histogram pipeline for one stream
pub struct WbmhPipeline {
    stream_id: StreamId,
    manager: Arc<WindowManager>,
    ingester: Option<Ingester>,
    counters: Arc<PipelineCounters>,
    buffer_capacity: u64,
    summarizer: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    merger: Option<JoinHandle<()>>,
}

impl WbmhPipeline {
    /// Start the worker stages for a stream
    pub fn new(mut windowing: Box<dyn Windowing>, manager: Arc<WindowManager>, config: IngestConfig) -> Result<Self> {
        config.validate()?;
        let stream_id = manager.stream_id();

        let window_lengths = if config.ingest_buffer_size > 0 {
            windowing.windows_covering_upto(config.ingest_buffer_size / config.num_ingest_buffers as u64)
        } else {
            Vec::new()
        };
        let buffer_capacity: u64 = window_lengths.iter().sum();

        let barrier = Arc::new(FlushBarrier::new());
        let counters = Arc::new(PipelineCounters::default());
        let (merger_tx, merger_rx) = crossbeam_channel::bounded(config.max_queue_size);
        let (writer_tx, writer_rx) = crossbeam_channel::bounded(config.max_queue_size);

        let merger = Merger::new(
            windowing,
            manager.clone(),
            config.windows_per_merge_batch,
            config.parallelize_merge,
            counters.clone(),
        );
        let merger = {
            let barrier = barrier.clone();
            spawn_stage(stream_id, Stage::Merger, move || merger.run(merger_rx, barrier))?
        };

        let writer = Writer::new(manager.clone(), merger_tx.clone());
        let writer = {
            let barrier = barrier.clone();
            spawn_stage(stream_id, Stage::Writer, move || writer.run(writer_rx, barrier))?
        };

        let (buffers, summarizer) = if buffer_capacity > 0 {
            let num_buffers = config.num_ingest_buffers;
            let (empty_tx, empty_rx) = crossbeam_channel::bounded(num_buffers);
            let (partial_tx, partial_rx) = crossbeam_channel::bounded(num_buffers);
            let (summarizer_tx, summarizer_rx) = crossbeam_channel::bounded(num_buffers + 1);
            for _ in 0..num_buffers {
                empty_tx
                    .send(IngestBuffer::new(buffer_capacity as usize, config.values_are_longs))
                    .map_err(|_| DecayError::PipelineClosed)?;
            }

            info!(
                "Stream {}: buffering {} x {} elements as windows {:?}",
                stream_id, num_buffers, buffer_capacity, window_lengths
            );
            let summarizer = Summarizer::new(
                manager.clone(),
                window_lengths,
                empty_tx.clone(),
                partial_tx,
                writer_tx.clone(),
            );
            let handle = {
                let barrier = barrier.clone();
                spawn_stage(stream_id, Stage::Summarizer, move || {
                    summarizer.run(summarizer_rx, barrier)
                })?
            };
            let pool = BufferPool::new(empty_tx, empty_rx, partial_rx, summarizer_tx);
            (Some(pool), Some(handle))
        } else {
            info!("Stream {}: appending unbuffered", stream_id);
            (None, None)
        };

        let ingester = Ingester::new(manager.clone(), barrier, buffers, writer_tx, merger_tx);
        Ok(Self {
            stream_id,
            manager,
            ingester: Some(ingester),
            counters,
            buffer_capacity: if summarizer.is_some() { buffer_capacity } else { 0 },
            summarizer,
            writer: Some(writer),
            merger: Some(merger),
        })
    }

    /// Stream served by this pipeline
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Store facade holding this stream's windows
    pub fn window_manager(&self) -> &Arc<WindowManager> {
        &self.manager
    }

    /// Check if appends go through ingest buffers
    pub fn is_buffered(&self) -> bool {
        self.ingester.as_ref().map_or(false, Ingester::is_buffered)
    }

    /// Check if the pipeline was closed
    pub fn is_closed(&self) -> bool {
        self.ingester.is_none()
    }

    /// Append one element. Timestamps must be strictly increasing.
    pub fn append(&mut self, ts: Timestamp, value: impl Into<Value>) -> Result<()> {
        let ingester = self.ingester.as_mut().ok_or(DecayError::PipelineClosed)?;
        ingester.append(ts, value.into())?;

        let appended = self.counters.elements_appended.fetch_add(1, Ordering::Relaxed) + 1;
        if appended % PROGRESS_LOG_INTERVAL == 0 {
            let stats = self.stats();
            info!(
                "Stream {}: appended {}, writer queue {}, merger queue {}, unissued merges {}, free buffers {}",
                self.stream_id,
                appended,
                stats.writer_queue_depth,
                stats.merger_queue_depth,
                stats.unissued_merges,
                stats.free_buffers
            );
        }
        Ok(())
    }

    /// Block until every element appended so far is written and merge-consistent
    pub fn flush(&mut self) -> Result<()> {
        self.ingester
            .as_mut()
            .ok_or(DecayError::PipelineClosed)?
            .flush(Marker::Flush)
    }

    /// Flush, then stop buffering and append unbuffered from now on
    pub fn flush_and_set_unbuffered(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(ingester) = self.ingester.as_mut() {
            ingester.drop_buffers();
        }
        self.buffer_capacity = 0;
        if let Some(handle) = self.summarizer.take() {
            join_stage(Stage::Summarizer, handle)?;
        }
        info!("Stream {}: switched to unbuffered appends", self.stream_id);
        Ok(())
    }

    /// Flush and stop every stage. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut ingester) = self.ingester.take() else {
            return Ok(());
        };
        let flushed = ingester.flush(Marker::Shutdown);
        let appended = ingester.count();
        // disconnects the stage queues, so stages stop even after a failure
        drop(ingester);

        let mut joined = Ok(());
        for (stage, handle) in [
            (Stage::Summarizer, self.summarizer.take()),
            (Stage::Writer, self.writer.take()),
            (Stage::Merger, self.merger.take()),
        ] {
            if let Some(handle) = handle {
                let result = join_stage(stage, handle);
                if joined.is_ok() {
                    joined = result;
                }
            }
        }

        match &flushed {
            Ok(()) => info!("Stream {}: pipeline closed after {} elements", self.stream_id, appended),
            Err(e) => warn!("Stream {}: pipeline closed with error: {}", self.stream_id, e),
        }
        flushed.and(joined)
    }

    /// Get pipeline statistics
    pub fn stats(&self) -> PipelineStats {
        let (writer_queue_depth, merger_queue_depth, free_buffers) =
            self.ingester.as_ref().map_or((0, 0, 0), |ingester| {
                (
                    ingester.writer_queue_depth(),
                    ingester.merger_queue_depth(),
                    ingester.free_buffers(),
                )
            });
        PipelineStats {
            stream_id: self.stream_id,
            elements_appended: self.counters.elements_appended.load(Ordering::Relaxed),
            buffer_capacity: self.buffer_capacity,
            writer_queue_depth,
            merger_queue_depth,
            free_buffers,
            unissued_merges: self.counters.unissued_merges.load(Ordering::Relaxed),
            live_windows: self.counters.live_windows.load(Ordering::Relaxed),
            merges_issued: self.counters.merges_issued.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WbmhPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Stream {}: error closing pipeline on drop: {}", self.stream_id, e);
        }
    }
}

fn spawn_stage<F>(stream_id: StreamId, stage: Stage, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("stream-{}-{}", stream_id, stage.name()))
        .spawn(f)
        .map_err(|e| DecayError::PipelineFailed {
            stage: stage.name(),
            reason: e.to_string(),
        })
}

fn join_stage(stage: Stage, handle: JoinHandle<()>) -> Result<()> {
    handle.join().map_err(|_| DecayError::PipelineFailed {
        stage: stage.name(),
        reason: "stage thread panicked".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{Aggregate, CountOperator, Operators, SumOperator, WindowOperator};
    use crate::store::testing::FailingBackingStore;
    use crate::store::{BackingStore, MemoryBackingStore};
    use crate::windowing::{
        ExponentialWindowLengths, GenericWindowing, RationalPowerWindowLengths, WindowLengthSequence,
    };
    use crate::SummaryWindow;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn operators() -> Operators {
        let ops: Vec<Box<dyn WindowOperator>> = vec![Box::new(CountOperator), Box::new(SumOperator)];
        Arc::new(ops)
    }

    fn exponential(base: f64) -> Box<dyn Windowing> {
        Box::new(GenericWindowing::new(ExponentialWindowLengths::new(base).unwrap()))
    }

    fn pipeline_on(
        store: Arc<dyn BackingStore>,
        stream: StreamId,
        windowing: Box<dyn Windowing>,
        config: IngestConfig,
    ) -> WbmhPipeline {
        let manager = Arc::new(WindowManager::new(stream, store, operators()));
        WbmhPipeline::new(windowing, manager, config).unwrap()
    }

    fn pipeline(windowing: Box<dyn Windowing>, config: IngestConfig) -> WbmhPipeline {
        pipeline_on(Arc::new(MemoryBackingStore::new()), 1, windowing, config)
    }

    /// Window sizes, oldest first
    fn sizes(pipeline: &WbmhPipeline) -> Vec<u64> {
        windows(pipeline).iter().map(SummaryWindow::size).collect()
    }

    fn windows(pipeline: &WbmhPipeline) -> Vec<SummaryWindow> {
        pipeline.window_manager().all_windows().unwrap()
    }

    /// Append counts 0..n with timestamp = count, then close
    fn populate(windowing: Box<dyn Windowing>, config: IngestConfig, n: i64) -> WbmhPipeline {
        let mut pipeline = pipeline(windowing, config);
        for t in 0..n {
            pipeline.append(t, t).unwrap();
        }
        pipeline.close().unwrap();
        pipeline
    }

    fn assert_partition(windows: &[SummaryWindow], n: u64) {
        let mut next_count = 0;
        let mut prev_te = None;
        for w in windows {
            assert_eq!(w.cs, next_count, "gap or overlap at {}", w);
            assert!(w.ce >= w.cs);
            assert!(prev_te.map_or(true, |te| te < w.ts));
            next_count = w.ce + 1;
            prev_te = Some(w.te);
        }
        assert_eq!(next_count, n);
    }

    #[test]
    fn test_config_validation() {
        assert!(IngestConfig::default().validate().is_ok());
        let mut config = IngestConfig::default();
        config.windows_per_merge_batch = 0;
        assert!(matches!(config.validate(), Err(DecayError::Config(_))));

        let mut config = IngestConfig::buffered(30, 0);
        assert!(config.validate().is_err());
        config.num_ingest_buffers = 2;
        config.max_queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbuffered_evolution() {
        let expected: Vec<Vec<u64>> = vec![
            vec![1],
            vec![1, 1],
            vec![2, 1],
            vec![2, 1, 1],
            vec![2, 2, 1],
            vec![2, 2, 1, 1],
            vec![4, 2, 1],
            vec![4, 2, 1, 1],
            vec![4, 2, 2, 1],
            vec![4, 2, 2, 1, 1],
            vec![4, 4, 2, 1],
            vec![4, 4, 2, 1, 1],
            vec![4, 4, 2, 2, 1],
            vec![4, 4, 2, 2, 1, 1],
            vec![8, 4, 2, 1],
        ];
        let mut pipeline = pipeline(exponential(2.0), IngestConfig::default());
        for (t, shape) in expected.iter().enumerate() {
            pipeline.append(t as i64, 1i64).unwrap();
            pipeline.flush().unwrap();
            assert_eq!(&sizes(&pipeline), shape, "N = {}", t + 1);
        }
        pipeline.close().unwrap();
    }

    #[test]
    fn test_unbuffered_shapes() {
        let p = populate(exponential(2.0), IngestConfig::default(), 100);
        assert_eq!(sizes(&p), vec![32, 32, 16, 8, 4, 4, 2, 1, 1]);

        let linear = RationalPowerWindowLengths::new(1, 1, 1, 1).unwrap();
        let p = populate(Box::new(GenericWindowing::new(linear)), IngestConfig::default(), 10);
        assert_eq!(sizes(&p), vec![4, 2, 2, 1, 1]);

        let fixed = RationalPowerWindowLengths::new(1, 0, 1, 4).unwrap();
        let p = populate(Box::new(GenericWindowing::new(fixed)), IngestConfig::default(), 10);
        assert_eq!(sizes(&p), vec![4, 4, 2]);
    }

    #[test]
    fn test_merge_batch_size_does_not_change_partition() {
        for n in [100, 1000] {
            let reference = sizes(&populate(exponential(2.0), IngestConfig::default(), n));
            for batch in [3, 7, 64] {
                let config = IngestConfig {
                    windows_per_merge_batch: batch,
                    ..IngestConfig::default()
                };
                assert_eq!(sizes(&populate(exponential(2.0), config, n)), reference, "batch {}", batch);
            }
        }
    }

    #[test]
    fn test_buffered_shapes() {
        // buffer edges become window boundaries, so shapes differ from the unbuffered ones
        // two buffers of 15 = 8 + 4 + 2 + 1
        let p = populate(exponential(2.0), IngestConfig::buffered(30, 2), 31);
        assert_eq!(sizes(&p), vec![15, 8, 4, 2, 1, 1]);

        let p = populate(exponential(2.0), IngestConfig::buffered(30, 2), 20);
        assert_eq!(sizes(&p), vec![8, 4, 3, 2, 2, 1]);

        let p = populate(exponential(2.0), IngestConfig::buffered(3, 1), 15);
        assert_eq!(sizes(&p), vec![6, 3, 3, 2, 1]);
    }

    #[test]
    fn test_buffered_matches_unbuffered_within_one_buffer() {
        for n in [1, 5, 10, 15] {
            let buffered = populate(exponential(2.0), IngestConfig::buffered(30, 2), n);
            let unbuffered = populate(exponential(2.0), IngestConfig::default(), n);
            assert_eq!(sizes(&buffered), sizes(&unbuffered), "n = {}", n);
        }

        // single-element buffers behave like the bypass path
        let buffered = populate(exponential(2.0), IngestConfig::buffered(1, 1), 50);
        let unbuffered = populate(exponential(2.0), IngestConfig::default(), 50);
        assert_eq!(sizes(&buffered), sizes(&unbuffered));
    }

    #[test]
    fn test_partition_aggregates_and_decay_bound() {
        let mut rng = StdRng::seed_from_u64(42);
        let sequences: Vec<fn() -> Box<dyn WindowLengthSequence>> = vec![
            || -> Box<dyn WindowLengthSequence> { Box::new(ExponentialWindowLengths::new(2.0).unwrap()) },
            || -> Box<dyn WindowLengthSequence> { Box::new(ExponentialWindowLengths::new(1.5).unwrap()) },
            || -> Box<dyn WindowLengthSequence> {
                Box::new(RationalPowerWindowLengths::new(1, 1, 1, 1).unwrap())
            },
        ];

        for make in &sequences {
            for buffer_size in [0, 3, 15, 64] {
                let n = rng.gen_range(1..300u64);
                let mut pipeline = pipeline(
                    Box::new(GenericWindowing::new(make())),
                    IngestConfig::buffered(buffer_size, 1),
                );
                let mut ts = 0;
                let mut values = Vec::new();
                for _ in 0..n {
                    ts += rng.gen_range(1..10);
                    let v: i64 = rng.gen_range(-100..100);
                    values.push(v);
                    pipeline.append(ts, v).unwrap();
                }
                pipeline.close().unwrap();

                let windows = windows(&pipeline);
                assert_partition(&windows, n);
                for w in &windows {
                    let expected_sum: i64 = values[w.cs as usize..=w.ce as usize].iter().sum();
                    assert_eq!(w.aggregates[0], Aggregate::Long(w.size() as i64));
                    assert_eq!(w.aggregates[1], Aggregate::Long(expected_sum));
                }

                // never coarser than the decay function at the same rank
                let mut lengths = make();
                for w in windows.iter().rev() {
                    assert!(w.size() <= lengths.next_window_length(), "n = {}, buffer {}", n, buffer_size);
                }
            }
        }
    }

    #[test]
    fn test_idempotent_flush() {
        let store = Arc::new(MemoryBackingStore::new());
        let mut pipeline = pipeline_on(store.clone(), 1, exponential(2.0), IngestConfig::buffered(30, 2));
        for t in 0..40 {
            pipeline.append(t, t).unwrap();
        }
        pipeline.flush().unwrap();
        let before = (store.stats(), windows(&pipeline));
        pipeline.flush().unwrap();
        pipeline.flush().unwrap();
        assert_eq!((store.stats(), windows(&pipeline)), before);
        pipeline.close().unwrap();
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut pipeline = pipeline(exponential(2.0), IngestConfig::buffered(30, 2));
        pipeline.append(5, 1i64).unwrap();
        let err = pipeline.append(5, 2i64).unwrap_err();
        assert!(matches!(err, DecayError::OutOfOrder { stream: 1, timestamp: 5, last: 5 }));
        assert!(pipeline.append(3, 3i64).is_err());
        pipeline.append(6, 4i64).unwrap();
        pipeline.close().unwrap();

        let windows = windows(&pipeline);
        assert_partition(&windows, 2);
        assert_eq!(pipeline.stats().elements_appended, 2);
    }

    #[test]
    fn test_long_buffers_reject_other_values() {
        let config = IngestConfig {
            values_are_longs: true,
            ..IngestConfig::buffered(30, 2)
        };
        let mut pipeline = pipeline(exponential(2.0), config);
        pipeline.append(1, 10i64).unwrap();
        assert!(matches!(pipeline.append(2, 1.5), Err(DecayError::InvalidValue(_))));
        pipeline.append(2, 20i64).unwrap();
        pipeline.close().unwrap();

        let windows = windows(&pipeline);
        assert_partition(&windows, 2);
        let total: i64 = windows.iter().filter_map(|w| w.aggregates[1].as_long()).sum();
        assert_eq!(total, 30);
    }

    #[test]
    fn test_store_failure_surfaces_on_flush() {
        let store = Arc::new(FailingBackingStore::new(3));
        let mut pipeline = pipeline_on(store, 1, exponential(2.0), IngestConfig::buffered(30, 2));
        // stays inside the first buffer, so nothing reaches the store before the flush
        for t in 0..14 {
            pipeline.append(t, t).unwrap();
        }
        let err = pipeline.flush().unwrap_err();
        assert!(err.is_retryable(), "unexpected {:?}", err);
        assert!(pipeline.flush().is_err());
        assert!(pipeline.close().is_err());
        assert!(pipeline.close().is_ok());
    }

    #[test]
    fn test_store_failure_unblocks_append() {
        let store = Arc::new(FailingBackingStore::new(0));
        let config = IngestConfig {
            max_queue_size: 1,
            ..IngestConfig::buffered(1, 1)
        };
        let mut pipeline = pipeline_on(store, 1, exponential(2.0), config);
        let err = (0..10_000)
            .map(|t| pipeline.append(t, t))
            .find_map(|result| result.err())
            .unwrap();
        assert!(matches!(err, DecayError::Store(_)));
        assert!(pipeline.close().is_err());
    }

    #[test]
    fn test_unbuffered_store_failure_is_synchronous() {
        let store = Arc::new(FailingBackingStore::new(2));
        let mut pipeline = pipeline_on(store, 1, exponential(2.0), IngestConfig::default());
        pipeline.append(0, 0i64).unwrap();
        pipeline.append(1, 1i64).unwrap();
        assert!(matches!(pipeline.append(2, 2i64), Err(DecayError::Store(_))));
        assert_eq!(pipeline.stats().elements_appended, 2);
    }

    #[test]
    fn test_buffered_flush_at_random_offsets() {
        let mut rng = StdRng::seed_from_u64(7);
        for round in 0..40 {
            let config = IngestConfig {
                windows_per_merge_batch: rng.gen_range(1..8),
                ..IngestConfig::buffered(rng.gen_range(1..64), rng.gen_range(1..4))
            };
            let n = rng.gen_range(1..400u64);
            let mut pipeline = pipeline(exponential(2.0), config);
            for t in 0..n as i64 {
                pipeline.append(t, 1i64).unwrap();
                if rng.gen_bool(0.05) {
                    pipeline.flush().unwrap();
                }
            }
            pipeline.close().unwrap();

            let windows = windows(&pipeline);
            assert_partition(&windows, n);
            let mut lengths = ExponentialWindowLengths::new(2.0).unwrap();
            for w in windows.iter().rev() {
                assert_eq!(w.aggregates[0], Aggregate::Long(w.size() as i64), "round {}", round);
                assert!(w.size() <= lengths.next_window_length(), "round {}", round);
            }
        }
    }

    #[test]
    fn test_parallel_merge_matches_sequential() {
        for base in [IngestConfig::default(), IngestConfig::buffered(30, 2)] {
            for batch in [1, 16, 64] {
                let sequential = IngestConfig {
                    windows_per_merge_batch: batch,
                    ..base.clone()
                };
                let parallel = IngestConfig {
                    parallelize_merge: true,
                    ..sequential.clone()
                };
                let a = populate(exponential(2.0), sequential, 2000);
                let b = populate(exponential(2.0), parallel, 2000);
                assert_eq!(windows(&a), windows(&b), "batch {}", batch);
                assert_eq!(a.stats().merges_issued, b.stats().merges_issued);
                assert_partition(&windows(&b), 2000);
            }
        }
    }

    #[test]
    fn test_merge_failure_surfaces_on_flush() {
        let store = Arc::new(FailingBackingStore::failing_deletes());
        let mut pipeline = pipeline_on(store, 1, exponential(2.0), IngestConfig::default());
        // the third window triggers the first merge
        for t in 0..3 {
            pipeline.append(t, t).unwrap();
        }
        let err = pipeline.flush().unwrap_err();
        assert!(matches!(err, DecayError::Store(_)), "unexpected {:?}", err);
        assert!(matches!(pipeline.append(3, 3i64), Err(DecayError::Store(_))));
        assert!(matches!(pipeline.close(), Err(DecayError::Store(_))));
        assert!(pipeline.close().is_ok());
    }

    #[test]
    fn test_flush_and_set_unbuffered() {
        let mut pipeline = pipeline(exponential(2.0), IngestConfig::buffered(30, 2));
        assert!(pipeline.is_buffered());
        for t in 0..20 {
            pipeline.append(t, t).unwrap();
        }
        pipeline.flush_and_set_unbuffered().unwrap();
        assert!(!pipeline.is_buffered());
        assert_eq!(sizes(&pipeline), vec![8, 4, 3, 2, 2, 1]);

        for t in 20..100 {
            pipeline.append(t, t).unwrap();
        }
        pipeline.close().unwrap();
        assert_eq!(sizes(&pipeline), vec![31, 32, 16, 8, 4, 4, 2, 2, 1]);
    }

    #[test]
    fn test_stats_and_close() {
        let mut pipeline = pipeline(exponential(2.0), IngestConfig::buffered(30, 2));
        assert_eq!(pipeline.stats().buffer_capacity, 15);
        assert_eq!(pipeline.stats().free_buffers, 2);
        for t in 0..100 {
            pipeline.append(t, t).unwrap();
        }
        pipeline.flush().unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.stream_id, 1);
        assert_eq!(stats.elements_appended, 100);
        assert_eq!(stats.unissued_merges, 0);
        assert_eq!(stats.live_windows, pipeline.window_manager().num_windows().unwrap());
        assert!(stats.merges_issued > 0);

        pipeline.close().unwrap();
        assert!(pipeline.is_closed());
        assert!(matches!(pipeline.append(100, 1i64), Err(DecayError::PipelineClosed)));
        assert!(matches!(pipeline.flush(), Err(DecayError::PipelineClosed)));
        assert!(pipeline.close().is_ok());
    }

    #[test]
    fn test_streams_in_parallel() {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryBackingStore::new());
        let handles: Vec<_> = (0..4u64)
            .map(|stream| {
                let store = store.clone();
                thread::spawn(move || {
                    let config = if stream % 2 == 0 {
                        IngestConfig::default()
                    } else {
                        IngestConfig::buffered(1, 1)
                    };
                    let mut pipeline = pipeline_on(store, stream, exponential(2.0), config);
                    for t in 0..500 {
                        pipeline.append(t, t).unwrap();
                    }
                    pipeline.close().unwrap();
                    sizes(&pipeline)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(
                handle.join().unwrap(),
                vec![128, 128, 64, 64, 32, 32, 16, 16, 8, 4, 4, 2, 1, 1]
            );
        }
        assert_eq!(store.num_windows(0).unwrap(), 14);
        assert_eq!(store.num_windows(3).unwrap(), 14);
    }
}
