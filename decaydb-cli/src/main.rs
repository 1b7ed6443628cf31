//! DecayDB CLI - populate synthetic decayed streams and print their shapes

use anyhow::Context;
use clap::Parser;
use decaydb_core::operators::{CountOperator, MaxOperator, SumOperator, WindowOperator};
use decaydb_core::store::{BackingStore, MemoryBackingStore, WindowManager};
use decaydb_core::windowing::{ExponentialWindowLengths, GenericWindowing};
use decaydb_core::{IngestConfig, PipelineStats, StreamId, WbmhPipeline};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// DecayDB - populate synthetic time-decayed streams
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct PopulateConfig {
    /// Independent streams ingested in parallel
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    streams: u64,

    /// Elements appended to each stream
    #[arg(long, default_value_t = 1_000_000)]
    count: u64,

    /// Base of the exponential decay function
    #[arg(long, default_value_t = 2.0)]
    base: f64,

    /// Total ingest buffer size per stream; 0 appends unbuffered
    #[arg(long, default_value_t = 0)]
    buffer: u64,

    /// Raw windows between merge batches
    #[arg(long, default_value_t = 1)]
    batch: u64,

    /// Issue independent merge chains in parallel
    #[arg(long)]
    parallel_merge: bool,
}

impl PopulateConfig {
    fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            windows_per_merge_batch: self.batch,
            values_are_longs: true,
            parallelize_merge: self.parallel_merge,
            ..IngestConfig::buffered(self.buffer, 2)
        }
    }
}

/// Outcome of populating one stream
#[derive(Debug, Serialize)]
struct StreamReport {
    stream_id: StreamId,
    elements: u64,
    windows: usize,
    /// Window lengths, newest first
    window_lengths: Vec<u64>,
    elapsed_ms: u128,
    stats: PipelineStats,
}

fn populate_stream(
    stream_id: StreamId,
    store: Arc<dyn BackingStore>,
    config: PopulateConfig,
) -> anyhow::Result<StreamReport> {
    let operators: Vec<Box<dyn WindowOperator>> = vec![
        Box::new(CountOperator),
        Box::new(SumOperator),
        Box::new(MaxOperator),
    ];
    let manager = Arc::new(WindowManager::new(stream_id, store, Arc::new(operators)));
    let windowing = GenericWindowing::new(ExponentialWindowLengths::new(config.base)?);
    let mut pipeline = WbmhPipeline::new(Box::new(windowing), manager.clone(), config.ingest_config())?;

    let mut rng = StdRng::seed_from_u64(stream_id);
    let mut ts: i64 = 0;
    let start = Instant::now();
    for _ in 0..config.count {
        ts += rng.gen_range(1..=10);
        pipeline
            .append(ts, rng.gen_range(0..1_000i64))
            .with_context(|| format!("stream {stream_id}: append at {ts} failed"))?;
    }
    pipeline
        .close()
        .with_context(|| format!("stream {stream_id}: close failed"))?;
    let elapsed = start.elapsed();
    info!("Stream {} populated in {:?}", stream_id, elapsed);

    let window_lengths: Vec<u64> = manager.all_windows()?.iter().rev().map(|w| w.size()).collect();
    Ok(StreamReport {
        stream_id,
        elements: config.count,
        windows: window_lengths.len(),
        window_lengths,
        elapsed_ms: elapsed.as_millis(),
        stats: pipeline.stats(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let config = PopulateConfig::parse();
    info!("DecayDB {} populator", decaydb_core::VERSION);
    info!(
        "Populating {} streams with {} elements each (base {}, buffer {}, batch {})",
        config.streams, config.count, config.base, config.buffer, config.batch
    );

    let store = Arc::new(MemoryBackingStore::new());
    let mut tasks = Vec::with_capacity(config.streams as usize);
    for stream_id in 0..config.streams {
        let store: Arc<dyn BackingStore> = store.clone();
        let config = config.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            populate_stream(stream_id, store, config)
        }));
    }

    let mut reports = Vec::with_capacity(tasks.len());
    for task in tasks {
        reports.push(task.await.context("stream task panicked")??);
    }

    let store_stats = store.stats();
    info!(
        "Store holds {} windows in {} bytes ({} puts, {} deletes)",
        store_stats.entries, store_stats.size_bytes, store_stats.puts, store_stats.deletes
    );
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
