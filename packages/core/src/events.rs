//! Lifecycle events for logging and real-time observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId};

/// Events emitted by the job queue system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Queue events
    /// A queue actor was started.
    QueueCreated {
        queue: String,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A new job was enqueued.
    JobEnqueued { job: Job, timestamp: DateTime<Utc> },
    /// A delayed job became ready.
    JobPromoted {
        job_id: JobId,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    JobClaimed {
        job_id: JobId,
        queue: String,
        worker_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: JobId,
        queue: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// An attempt failed.
    JobFailed {
        job_id: JobId,
        queue: String,
        error: String,
        attempts: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A claim expired and the job went back to the waiting list.
    JobStalled {
        job_id: JobId,
        queue: String,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A terminal job left the retention window.
    JobPruned {
        job_id: JobId,
        queue: String,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker slot attached to a queue.
    WorkerConnected {
        worker_id: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker slot stopped.
    WorkerDisconnected {
        worker_id: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::QueueCreated { timestamp, .. }
            | JobEvent::JobEnqueued { timestamp, .. }
            | JobEvent::JobPromoted { timestamp, .. }
            | JobEvent::JobClaimed { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. }
            | JobEvent::JobStalled { timestamp, .. }
            | JobEvent::JobPruned { timestamp, .. }
            | JobEvent::WorkerConnected { timestamp, .. }
            | JobEvent::WorkerDisconnected { timestamp, .. } => *timestamp,
        }
    }

    /// Get the queue name associated with this event.
    pub fn queue(&self) -> &str {
        match self {
            JobEvent::JobEnqueued { job, .. } => &job.queue,
            JobEvent::QueueCreated { queue, .. }
            | JobEvent::JobPromoted { queue, .. }
            | JobEvent::JobClaimed { queue, .. }
            | JobEvent::JobCompleted { queue, .. }
            | JobEvent::JobFailed { queue, .. }
            | JobEvent::JobStalled { queue, .. }
            | JobEvent::JobPruned { queue, .. }
            | JobEvent::WorkerConnected { queue, .. }
            | JobEvent::WorkerDisconnected { queue, .. } => queue,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job, .. } => Some(job.id),
            JobEvent::JobPromoted { job_id, .. }
            | JobEvent::JobClaimed { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobStalled { job_id, .. }
            | JobEvent::JobPruned { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::QueueCreated { queue, .. } => format!("Queue '{}' created", queue),
            JobEvent::JobEnqueued { job, .. } => {
                format!("Job {} enqueued ({})", job.id, job.state)
            }
            JobEvent::JobPromoted { job_id, .. } => format!("Job {} ready", job_id),
            JobEvent::JobClaimed {
                job_id,
                worker_id,
                attempt,
                ..
            } => format!("Job {} claimed by {} (attempt {})", job_id, worker_id, attempt),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            JobEvent::JobStalled {
                job_id, worker_id, ..
            } => format!("Job {} stalled on {}", job_id, worker_id),
            JobEvent::JobPruned { job_id, .. } => format!("Job {} pruned", job_id),
            JobEvent::WorkerConnected {
                worker_id, queue, ..
            } => format!("Worker {} connected to {}", worker_id, queue),
            JobEvent::WorkerDisconnected {
                worker_id, queue, ..
            } => format!("Worker {} disconnected from {}", worker_id, queue),
        }
    }
}
