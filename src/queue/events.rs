//! Queue lifecycle events.
//!
//! The queue publishes to a broadcast channel; any number of observers
//! (progress bars, websocket bridges) subscribe independently. A slow
//! subscriber may lag and skip events, so consumers that need exact state
//! should re-read the queue rather than reconstruct it from the stream.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Snapshot of queue-wide progress, derived from current task states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// `round(100 * (completed + failed) / total)`, zero when empty.
    pub percent: u8,
}

impl QueueProgress {
    /// Whether every submitted task has reached a terminal state.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// Events emitted by the queue as tasks move through their lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A task was appended to the pending list.
    TaskAdded { id: String },
    /// A task left the pending list and its processor was invoked.
    TaskStarted { id: String },
    /// The processor resolved successfully.
    TaskCompleted { id: String },
    /// The processor threw, rejected, or exceeded its timeout.
    TaskFailed { id: String, error: PipelineError },
    /// Progress snapshot, published after every settlement.
    Progress(QueueProgress),
    /// Pending and running both reached zero.
    Drained,
}
