//! A fixed set of worker slots bound to one queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use queue_core::{QueueConfig, QueueError, QueueResult};
use ractor::{Actor, ActorCell, ActorRef};

use crate::event_bus::EventBus;
use crate::handler::JobHandler;
use crate::messages::{QueueMessage, WorkerMessage};
use crate::worker_actor::{IdleBackoff, WorkerActor, WorkerArgs};

/// Worker slots of one queue.
///
/// Each slot holds at most one claim at a time, so the pool never has more
/// than `size()` jobs of its queue in flight.
pub struct WorkerPool {
    queue: String,
    workers: Vec<ActorRef<WorkerMessage>>,
    busy: Arc<AtomicUsize>,
}

/// What a pool needs to know about the queue it serves.
pub struct PoolArgs {
    pub queue_name: String,
    pub queue: ActorRef<QueueMessage>,
    pub config: QueueConfig,
    pub concurrency: usize,
    pub handler: Arc<dyn JobHandler>,
    pub bus: Arc<EventBus>,
    pub rpc_timeout: Duration,
}

impl WorkerPool {
    /// Spawn `args.concurrency` worker slots linked to `supervisor`.
    pub async fn spawn(args: PoolArgs, supervisor: ActorCell) -> QueueResult<Self> {
        if args.concurrency == 0 {
            return Err(QueueError::InvalidArgument(
                "concurrency must be at least 1".into(),
            ));
        }

        let busy = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(args.concurrency);

        for slot in 1..=args.concurrency {
            let worker_args = WorkerArgs {
                worker_id: format!("{}-worker-{}", args.queue_name, slot),
                queue_name: args.queue_name.clone(),
                queue: args.queue.clone(),
                handler: Arc::clone(&args.handler),
                bus: Arc::clone(&args.bus),
                backoff: IdleBackoff::new(
                    Duration::from_millis(args.config.idle_backoff_ms),
                    Duration::from_millis(args.config.max_idle_backoff_ms),
                ),
                rpc_timeout: args.rpc_timeout,
                busy: Arc::clone(&busy),
            };

            match Actor::spawn_linked(None, WorkerActor, worker_args, supervisor.clone()).await {
                Ok((worker, _handle)) => workers.push(worker),
                Err(e) => {
                    for worker in &workers {
                        let _ = worker.send_message(WorkerMessage::Shutdown);
                    }
                    return Err(QueueError::Actor(format!("Failed to spawn worker: {}", e)));
                }
            }
        }

        tracing::info!(
            "Started {} worker(s) for queue '{}'",
            workers.len(),
            args.queue_name
        );

        Ok(Self {
            queue: args.queue_name,
            workers,
            busy,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Number of worker slots.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Number of slots currently running a handler.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Ask every slot to stop. Running handlers finish first.
    pub fn shutdown(&self) {
        tracing::info!("Stopping worker pool of '{}'", self.queue);
        for worker in &self.workers {
            let _ = worker.send_message(WorkerMessage::Shutdown);
        }
    }
}
