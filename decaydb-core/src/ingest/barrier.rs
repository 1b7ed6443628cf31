//! Flush barrier shared by the caller and the worker stages

use crate::{DecayError, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

/// Worker stages that acknowledge flush tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Summarizer = 0,
    Writer = 1,
    Merger = 2,
}

impl Stage {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Stage::Summarizer => "summarizer",
            Stage::Writer => "writer",
            Stage::Merger => "merger",
        }
    }
}

struct BarrierState {
    tickets: u64,
    acks: [u64; 3],
    failure: Option<DecayError>,
    /// Dropped on failure, which disconnects `abort_rx`
    abort_tx: Option<Sender<()>>,
}

/// One ticket counter plus one acknowledgment counter per stage.
///
/// The first stage failure is recorded here and handed to every current and
/// future waiter.
pub(crate) struct FlushBarrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
    abort_rx: Receiver<()>,
}

impl FlushBarrier {
    pub(crate) fn new() -> Self {
        let (abort_tx, abort_rx) = crossbeam_channel::bounded(0);
        Self {
            state: Mutex::new(BarrierState {
                tickets: 0,
                acks: [0; 3],
                failure: None,
                abort_tx: Some(abort_tx),
            }),
            cond: Condvar::new(),
            abort_rx,
        }
    }

    /// Draw a new flush ticket
    pub(crate) fn next_ticket(&self) -> u64 {
        let mut state = self.state.lock();
        state.tickets += 1;
        state.tickets
    }

    /// Record that a stage processed everything up to a ticket
    pub(crate) fn ack(&self, stage: Stage, ticket: u64) {
        {
            let mut state = self.state.lock();
            let acked = &mut state.acks[stage as usize];
            if ticket > *acked {
                *acked = ticket;
            }
        }
        self.cond.notify_all();
    }

    /// Block until a stage acknowledges a ticket or some stage fails
    pub(crate) fn wait(&self, stage: Stage, ticket: u64) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }
            if state.acks[stage as usize] >= ticket {
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    /// Record a stage failure. Only the first failure is kept.
    pub(crate) fn fail(&self, stage: Stage, failure: DecayError) {
        {
            let mut state = self.state.lock();
            if state.failure.is_none() {
                error!("Pipeline stage {} failed: {}", stage.name(), failure);
                state.failure = Some(failure);
                state.abort_tx = None;
            } else {
                debug!("Pipeline stage {} stopped after earlier failure: {}", stage.name(), failure);
            }
        }
        self.cond.notify_all();
    }

    /// The first recorded failure
    pub(crate) fn failure(&self) -> Option<DecayError> {
        self.state.lock().failure.clone()
    }

    /// The recorded failure, or `PipelineClosed` if stages stopped cleanly
    pub(crate) fn failure_or_closed(&self) -> DecayError {
        self.failure().unwrap_or(DecayError::PipelineClosed)
    }

    /// Disconnects once a failure is recorded; select on it to stop blocking waits
    pub(crate) fn abort_signal(&self) -> &Receiver<()> {
        &self.abort_rx
    }
}

/// Receive from a queue, giving up when the pipeline fails
pub(crate) fn recv_or_abort<T>(rx: &Receiver<T>, barrier: &FlushBarrier) -> Result<T> {
    let abort = barrier.abort_signal();
    crossbeam_channel::select! {
        recv(rx) -> msg => msg.map_err(|_| barrier.failure_or_closed()),
        recv(abort) -> _ => Err(barrier.failure_or_closed()),
    }
}
