//! Error taxonomy for the analysis pipeline.
//!
//! Every failure that crosses a component boundary is one of these
//! variants, each carrying a stable code that calling layers (CLI, HTTP)
//! can map to actionable messages without string-matching.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the pipeline and its components.
///
/// `Clone` is required because a single in-flight failure is fanned out to
/// every waiter coalesced onto the same request.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "message")]
pub enum PipelineError {
    /// Path validation rejected the request before any work started.
    #[error("validation failed: {0}")]
    #[serde(rename = "VALIDATION")]
    Validation(String),

    /// A stat call or task exceeded its time budget.
    #[error("operation timed out after {}ms", .0.as_millis())]
    #[serde(rename = "TIMEOUT")]
    Timeout(Duration),

    /// An abort signal was honored before completion.
    #[error("operation cancelled")]
    #[serde(rename = "CANCELLED")]
    Cancelled,

    /// The analysis executor itself failed; the message is propagated
    /// unmodified from the executor.
    #[error("analysis failed: {0}")]
    #[serde(rename = "EXECUTION_FAILURE")]
    Execution(String),

    /// Unexpected I/O or serialization fault distinct from user input.
    #[error("internal error: {0}")]
    #[serde(rename = "INTERNAL")]
    Internal(String),
}

impl PipelineError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION",
            PipelineError::Timeout(_) => "TIMEOUT",
            PipelineError::Cancelled => "CANCELLED",
            PipelineError::Execution(_) => "EXECUTION_FAILURE",
            PipelineError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this error was caused by the caller's input rather than
    /// the system itself.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
