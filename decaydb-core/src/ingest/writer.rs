//! Window persistence stage

use super::barrier::{FlushBarrier, Stage};
use super::message::{stage_stopped, MergeNotice, StageMessage};
use crate::store::WindowManager;
use crate::{Result, StreamId, SummaryWindow};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use tracing::debug;

/// Writes windows to the store and notifies the merger, in count order
pub(crate) struct Writer {
    stream_id: StreamId,
    manager: Arc<WindowManager>,
    merger_tx: Sender<StageMessage<MergeNotice>>,
    windows_written: u64,
}

impl Writer {
    pub(crate) fn new(manager: Arc<WindowManager>, merger_tx: Sender<StageMessage<MergeNotice>>) -> Self {
        Self {
            stream_id: manager.stream_id(),
            manager,
            merger_tx,
            windows_written: 0,
        }
    }

    /// Stage loop, run on the writer thread
    pub(crate) fn run(mut self, rx: Receiver<StageMessage<SummaryWindow>>, barrier: Arc<FlushBarrier>) {
        for msg in rx.iter() {
            match self.process(msg, &barrier) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    barrier.fail(Stage::Writer, e);
                    break;
                }
            }
        }
        debug!(
            "Stream {}: writer stopped after {} windows",
            self.stream_id, self.windows_written
        );
    }

    fn process(&mut self, msg: StageMessage<SummaryWindow>, barrier: &FlushBarrier) -> Result<bool> {
        match msg {
            StageMessage::Data(window) => {
                self.manager.put_window(&window)?;
                self.windows_written += 1;
                let notice = MergeNotice {
                    id: window.id(),
                    size: window.size(),
                };
                self.merger_tx
                    .send(StageMessage::Data(notice))
                    .map_err(|_| stage_stopped(Stage::Merger.name()))?;
            }
            StageMessage::Flush(ticket) => {
                self.manager.flush()?;
                barrier.ack(Stage::Writer, ticket);
            }
            StageMessage::Shutdown(ticket) => {
                self.manager.flush()?;
                barrier.ack(Stage::Writer, ticket);
                return Ok(false);
            }
        }
        Ok(true)
    }
}
