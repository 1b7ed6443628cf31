//! Caller-side ingest stage

use super::barrier::{recv_or_abort, FlushBarrier, Stage};
use super::buffer::IngestBuffer;
use super::message::{stage_stopped, Marker, MergeNotice, StageMessage};
use crate::store::WindowManager;
use crate::{Count, DecayError, Result, StreamId, SummaryWindow, Timestamp, Value};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use tracing::debug;

/// Buffers recycled between the caller and the summarizer
pub(crate) struct BufferPool {
    active: Option<IngestBuffer>,
    empty_tx: Sender<IngestBuffer>,
    empty_rx: Receiver<IngestBuffer>,
    partial_rx: Receiver<IngestBuffer>,
    summarizer_tx: Sender<StageMessage<IngestBuffer>>,
}

impl BufferPool {
    pub(crate) fn new(
        empty_tx: Sender<IngestBuffer>,
        empty_rx: Receiver<IngestBuffer>,
        partial_rx: Receiver<IngestBuffer>,
        summarizer_tx: Sender<StageMessage<IngestBuffer>>,
    ) -> Self {
        Self {
            active: None,
            empty_tx,
            empty_rx,
            partial_rx,
            summarizer_tx,
        }
    }
}

/// Runs in the appending thread. Appends to one stream must be serialized.
pub(crate) struct Ingester {
    stream_id: StreamId,
    manager: Arc<WindowManager>,
    barrier: Arc<FlushBarrier>,
    buffers: Option<BufferPool>,
    writer_tx: Sender<StageMessage<SummaryWindow>>,
    merger_tx: Sender<StageMessage<MergeNotice>>,
    next_count: Count,
    last_timestamp: Option<Timestamp>,
}

impl Ingester {
    pub(crate) fn new(
        manager: Arc<WindowManager>,
        barrier: Arc<FlushBarrier>,
        buffers: Option<BufferPool>,
        writer_tx: Sender<StageMessage<SummaryWindow>>,
        merger_tx: Sender<StageMessage<MergeNotice>>,
    ) -> Self {
        Self {
            stream_id: manager.stream_id(),
            manager,
            barrier,
            buffers,
            writer_tx,
            merger_tx,
            next_count: 0,
            last_timestamp: None,
        }
    }

    /// Elements accepted so far
    pub(crate) fn count(&self) -> Count {
        self.next_count
    }

    pub(crate) fn is_buffered(&self) -> bool {
        self.buffers.is_some()
    }

    pub(crate) fn writer_queue_depth(&self) -> usize {
        self.writer_tx.len()
    }

    pub(crate) fn merger_queue_depth(&self) -> usize {
        self.merger_tx.len()
    }

    pub(crate) fn free_buffers(&self) -> usize {
        self.buffers.as_ref().map_or(0, |pool| pool.empty_rx.len())
    }

    /// Accept one element. Rejected elements leave the stream untouched.
    pub(crate) fn append(&mut self, ts: Timestamp, value: Value) -> Result<()> {
        if let Some(last) = self.last_timestamp {
            if ts <= last {
                return Err(DecayError::OutOfOrder {
                    stream: self.stream_id,
                    timestamp: ts,
                    last,
                });
            }
        }
        if let Some(failure) = self.barrier.failure() {
            return Err(failure);
        }

        match self.buffers.as_mut() {
            Some(pool) => Self::append_buffered(pool, &self.barrier, self.next_count, ts, value)?,
            None => self.append_unbuffered(ts, &value)?,
        }
        self.last_timestamp = Some(ts);
        self.next_count += 1;
        Ok(())
    }

    fn append_buffered(
        pool: &mut BufferPool,
        barrier: &FlushBarrier,
        count: Count,
        ts: Timestamp,
        value: Value,
    ) -> Result<()> {
        let mut buffer = match pool.active.take() {
            Some(buffer) => buffer,
            None => {
                // blocks while every buffer is queued for summarization
                let mut buffer = recv_or_abort(&pool.empty_rx, barrier)?;
                buffer.reset(count);
                buffer
            }
        };
        let appended = buffer.append(ts, value);
        if appended.is_ok() && buffer.is_full() {
            pool.summarizer_tx
                .send(StageMessage::Data(buffer))
                .map_err(|_| barrier.failure_or_closed())?;
        } else {
            pool.active = Some(buffer);
        }
        appended
    }

    /// Single-element window, written and announced from the calling thread
    fn append_unbuffered(&self, ts: Timestamp, value: &Value) -> Result<()> {
        let count = self.next_count;
        let mut window = self.manager.create_empty_window(ts, ts, count, count);
        self.manager.insert_into_window(&mut window, ts, value)?;
        self.manager.put_window(&window)?;
        self.merger_tx
            .send(StageMessage::Data(MergeNotice { id: ts, size: 1 }))
            .map_err(|_| self.barrier.failure_or_closed())
    }

    /// Push everything appended so far through every stage.
    ///
    /// A partially filled buffer is summarized as far as the window lengths allow;
    /// the summarizer hands back the rest, which is written as single-element
    /// windows behind the summarized ones.
    pub(crate) fn flush(&mut self, marker: Marker) -> Result<()> {
        let ticket = self.barrier.next_ticket();
        debug!("Stream {}: {:?} ticket {}", self.stream_id, marker, ticket);

        if let Some(pool) = self.buffers.as_mut() {
            let partial = match pool.active.take() {
                Some(buffer) if !buffer.is_empty() => {
                    pool.summarizer_tx
                        .send(StageMessage::Data(buffer))
                        .map_err(|_| self.barrier.failure_or_closed())?;
                    true
                }
                other => {
                    pool.active = other;
                    false
                }
            };
            pool.summarizer_tx
                .send(marker.message(ticket))
                .map_err(|_| self.barrier.failure_or_closed())?;
            self.barrier.wait(Stage::Summarizer, ticket)?;

            if partial {
                let mut remnant = recv_or_abort(&pool.partial_rx, &self.barrier)?;
                for i in 0..remnant.len() {
                    let ts = remnant.timestamp(i);
                    let count = remnant.start_count() + i as Count;
                    let mut window = self.manager.create_empty_window(ts, ts, count, count);
                    self.manager
                        .insert_into_window(&mut window, ts, &remnant.value(i))?;
                    self.writer_tx
                        .send(StageMessage::Data(window))
                        .map_err(|_| self.barrier.failure_or_closed())?;
                }
                remnant.reset(0);
                pool.empty_tx
                    .send(remnant)
                    .map_err(|_| stage_stopped(Stage::Summarizer.name()))?;
            }
        }

        self.writer_tx
            .send(marker.message(ticket))
            .map_err(|_| self.barrier.failure_or_closed())?;
        self.barrier.wait(Stage::Writer, ticket)?;

        self.merger_tx
            .send(marker.message(ticket))
            .map_err(|_| self.barrier.failure_or_closed())?;
        self.barrier.wait(Stage::Merger, ticket)
    }

    /// Stop buffering. The caller must flush first so no buffer is in flight.
    pub(crate) fn drop_buffers(&mut self) {
        if let Some(pool) = self.buffers.take() {
            debug_assert!(pool.active.as_ref().map_or(true, IngestBuffer::is_empty));
            debug!(
                "Stream {}: released {} ingest buffers",
                self.stream_id,
                pool.empty_rx.len() + usize::from(pool.active.is_some())
            );
        }
    }
}
