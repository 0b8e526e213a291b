//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based runtime around the `queue_core`
//! state machine and the [`Engine`] facade producers and workers use.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns queue actors and worker pools
//! - `QueueActor` - Single writer of one queue's jobs
//! - `WorkerActor` - One slot of a `WorkerPool`, claims and runs jobs
//! - `TimerWheel` - Periodic tick that promotes delayed jobs and expires leases
//! - `EventBus` - Delivers terminal outcomes to waiters and lifecycle events
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Engine, EngineConfig, EnqueueOptions, job_handler};
//!
//! let engine = Engine::start(EngineConfig::from_env()?).await?;
//! engine.register_handler("send_email", 2, job_handler!(|job| Ok(None))).await?;
//!
//! let job = engine
//!     .enqueue("send_email", serde_json::json!({"type": "welcome"}), EnqueueOptions::new())
//!     .await?;
//! let outcome = engine.await_terminal(job.id, Duration::from_secs(1)).await?;
//! ```

mod config;
mod engine;
mod event_bus;
mod handler;
mod messages;
mod queue_actor;
pub mod registry;
mod supervisor;
mod timer_wheel;
mod worker_actor;
mod worker_pool;

pub use config::EngineConfig;
pub use engine::Engine;
pub use event_bus::{EventBus, Subscription};
pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobHandler};
pub use messages::{QueueMessage, SupervisorMessage, WorkerMessage};
pub use queue_actor::{QueueActor, QueueActorArgs};
pub use registry::ActorRegistry;
pub use supervisor::{Supervisor, SupervisorArgs};
pub use timer_wheel::TimerWheel;
pub use worker_actor::{IdleBackoff, WorkerActor};
pub use worker_pool::{PoolArgs, WorkerPool};

pub use queue_core::{
    EnqueueOptions, Job, JobEvent, JobId, JobOutcome, JobState, QueueConfig, QueueError,
    QueueInfo, QueueResult, QueueStats,
};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
