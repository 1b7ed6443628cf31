//! Buffer summarization stage

use super::barrier::{FlushBarrier, Stage};
use super::buffer::IngestBuffer;
use super::message::{stage_stopped, StageMessage};
use crate::store::WindowManager;
use crate::{Result, StreamId, SummaryWindow};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, trace};

/// Cuts ingest buffers into windows matching the decay function's window lengths
pub(crate) struct Summarizer {
    stream_id: StreamId,
    manager: Arc<WindowManager>,
    /// Lengths of the windows covering one full buffer, newest first
    window_lengths: Vec<u64>,
    empty_tx: Sender<IngestBuffer>,
    partial_tx: Sender<IngestBuffer>,
    writer_tx: Sender<StageMessage<SummaryWindow>>,
}

impl Summarizer {
    pub(crate) fn new(
        manager: Arc<WindowManager>,
        window_lengths: Vec<u64>,
        empty_tx: Sender<IngestBuffer>,
        partial_tx: Sender<IngestBuffer>,
        writer_tx: Sender<StageMessage<SummaryWindow>>,
    ) -> Self {
        Self {
            stream_id: manager.stream_id(),
            manager,
            window_lengths,
            empty_tx,
            partial_tx,
            writer_tx,
        }
    }

    /// Stage loop, run on the summarizer thread
    pub(crate) fn run(self, rx: Receiver<StageMessage<IngestBuffer>>, barrier: Arc<FlushBarrier>) {
        for msg in rx.iter() {
            match self.process(msg, &barrier) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    barrier.fail(Stage::Summarizer, e);
                    break;
                }
            }
        }
        debug!("Stream {}: summarizer stopped", self.stream_id);
    }

    fn process(&self, msg: StageMessage<IngestBuffer>, barrier: &FlushBarrier) -> Result<bool> {
        match msg {
            StageMessage::Data(buffer) => self.summarize(buffer)?,
            StageMessage::Flush(ticket) => barrier.ack(Stage::Summarizer, ticket),
            StageMessage::Shutdown(ticket) => {
                barrier.ack(Stage::Summarizer, ticket);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of windows, taken from the front of `window_lengths`, a buffer of
    /// `size` elements is cut into
    fn num_windows_for(&self, size: usize) -> usize {
        let mut covered = 0;
        self.window_lengths
            .iter()
            .take_while(|&&length| {
                covered += length as usize;
                covered <= size
            })
            .count()
    }

    fn summarize(&self, mut buffer: IngestBuffer) -> Result<()> {
        let full = buffer.is_full();
        let num_windows = if full {
            self.window_lengths.len()
        } else {
            self.num_windows_for(buffer.len())
        };

        // oldest elements go into the longest window
        let mut offset = 0;
        for &length in self.window_lengths[..num_windows].iter().rev() {
            let end = offset + length as usize;
            let cs = buffer.start_count() + offset as u64;
            let mut window = self.manager.create_empty_window(
                buffer.timestamp(offset),
                buffer.timestamp(end - 1),
                cs,
                cs + length - 1,
            );
            for i in offset..end {
                self.manager
                    .insert_into_window(&mut window, buffer.timestamp(i), &buffer.value(i))?;
            }
            self.writer_tx
                .send(StageMessage::Data(window))
                .map_err(|_| stage_stopped(Stage::Writer.name()))?;
            offset = end;
        }

        if full {
            buffer.reset(0);
            self.empty_tx
                .send(buffer)
                .map_err(|_| stage_stopped("ingester"))?;
        } else {
            trace!(
                "Stream {}: partial buffer of {} leaves {} elements unsummarized",
                self.stream_id,
                buffer.len(),
                buffer.len() - offset
            );
            buffer.truncate_head(offset);
            self.partial_tx
                .send(buffer)
                .map_err(|_| stage_stopped("ingester"))?;
        }
        Ok(())
    }
}
