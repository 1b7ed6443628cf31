//! Messages flowing between pipeline stages

use crate::{DecayError, WindowId};

/// Queue element shared by every stage
#[derive(Debug)]
pub(crate) enum StageMessage<T> {
    /// Work item
    Data(T),
    /// Acknowledge the ticket once everything queued before it is processed
    Flush(u64),
    /// Like `Flush`, then stop the stage
    Shutdown(u64),
}

/// Which control marker a flush round injects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Marker {
    Flush,
    Shutdown,
}

impl Marker {
    pub(crate) fn message<T>(self, ticket: u64) -> StageMessage<T> {
        match self {
            Marker::Flush => StageMessage::Flush(ticket),
            Marker::Shutdown => StageMessage::Shutdown(ticket),
        }
    }
}

/// Window creation notification, sent by the writer to the merger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MergeNotice {
    pub id: WindowId,
    pub size: u64,
}

/// Error for a send into a stage that already stopped
pub(crate) fn stage_stopped(stage: &'static str) -> DecayError {
    DecayError::PipelineFailed {
        stage,
        reason: "stage stopped accepting input".into(),
    }
}
