//! Message types for actor communication.

use std::sync::Arc;

use queue_core::{
    Claim, ClaimedJob, EnqueueOptions, Job, JobId, JobState, QueueConfig, QueueInfo,
    QueueResult, QueueStats,
};
use ractor::{ActorRef, RpcReplyPort};

use crate::handler::JobHandler;

/// Messages for the QueueActor.
///
/// The queue actor's mailbox serializes every state transition of its queue.
#[derive(Debug)]
pub enum QueueMessage {
    /// Enqueue a new job.
    Enqueue {
        payload: serde_json::Value,
        options: EnqueueOptions,
        reply: RpcReplyPort<QueueResult<Job>>,
    },

    /// Hand the head of the waiting sequence to a worker.
    ClaimNext {
        worker_id: String,
        reply: RpcReplyPort<Option<ClaimedJob>>,
    },

    /// Report a successful attempt.
    Complete {
        claim: Claim,
        result: Option<serde_json::Value>,
        reply: RpcReplyPort<QueueResult<()>>,
    },

    /// Report a failed attempt.
    Fail {
        claim: Claim,
        error: String,
        reply: RpcReplyPort<QueueResult<()>>,
    },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// List jobs in this queue.
    ListJobs {
        state: Option<JobState>,
        limit: usize,
        reply: RpcReplyPort<Vec<Job>>,
    },

    /// Get queue info.
    GetInfo { reply: RpcReplyPort<QueueInfo> },

    /// Get queue stats.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// Timer tick: promote due jobs, reclaim stalled claims, prune history.
    Tick,

    /// Shutdown the queue gracefully.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to claim and run the next job.
    Poll,

    /// Shutdown the worker.
    Shutdown,
}

/// Messages for the Supervisor.
pub enum SupervisorMessage {
    /// Get or start the actor of a queue.
    OpenQueue {
        name: String,
        config: Option<QueueConfig>,
        reply: RpcReplyPort<QueueResult<ActorRef<QueueMessage>>>,
    },

    /// Attach a worker pool to a queue.
    RegisterHandler {
        queue: String,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
        reply: RpcReplyPort<QueueResult<()>>,
    },

    /// List all queues.
    ListQueues { reply: RpcReplyPort<Vec<QueueInfo>> },

    /// Timer tick, fanned out to every queue.
    Tick,

    /// Shutdown all pools and queues.
    Shutdown,
}
