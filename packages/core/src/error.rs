//! Error taxonomy shared by the queue, the actors and the engine facade.

use thiserror::Error;

use crate::{JobId, JobState};

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors reported by queue operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    /// Bad enqueue options. The job is never created.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// A transition was attempted from a state that does not permit it,
    /// or with a claim that no longer owns the job.
    #[error("Job {job_id} is {state}: {reason}")]
    InvalidState {
        job_id: JobId,
        state: JobState,
        reason: String,
    },

    /// Domain failure reported by a handler.
    #[error("Handler error: {0}")]
    Handler(String),

    /// The wait deadline passed. The job itself keeps running.
    #[error("Timed out waiting for job {0}")]
    Timeout(JobId),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue is full: {0}")]
    QueueFull(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl QueueError {
    pub(crate) fn invalid_state(job_id: JobId, state: JobState, reason: impl Into<String>) -> Self {
        QueueError::InvalidState {
            job_id,
            state,
            reason: reason.into(),
        }
    }

    /// Whether this error marks a stale or duplicate report that should be dropped.
    pub fn is_stale_report(&self) -> bool {
        matches!(self, QueueError::InvalidState { .. })
    }
}
