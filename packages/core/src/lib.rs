//! Core domain types for the job queue system.
//!
//! This crate contains the shared types and the per-queue state machine:
//! - Job, JobState and JobOutcome for work items
//! - Claim and ClaimedJob for the claim protocol
//! - JobQueue, the transition owner for a single queue
//! - QueueConfig, QueueStats and QueueInfo for configuration and introspection
//! - Events for real-time updates

mod claim;
mod error;
mod events;
mod job;
mod job_queue;
mod queue;

pub use claim::{Claim, ClaimedJob};
pub use error::{QueueError, QueueResult};
pub use events::JobEvent;
pub use job::{EnqueueOptions, Job, JobId, JobOutcome, JobState};
pub use job_queue::{FailOutcome, JobQueue};
pub use queue::{QueueConfig, QueueInfo, QueueStats};
