//! Task records owned by the queue.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::PipelineError;

/// Lifecycle states of a queued task. `Completed` and `Failed` are
/// terminal; there is no built-in retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work submitted to the queue.
///
/// Records are mutated only by the queue's own processing loop and are
/// retained until queried or the queue is dropped.
#[derive(Debug, Clone)]
pub struct Task<T, R> {
    pub id: String,
    pub input: T,
    pub status: TaskStatus,
    pub result: Option<R>,
    pub error: Option<PipelineError>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl<T, R> Task<T, R> {
    pub(crate) fn new(id: String, input: T) -> Self {
        Self {
            id,
            input,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock running time, once the task has started.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            (Some(start), None) => Some(start.elapsed()),
            _ => None,
        }
    }
}
