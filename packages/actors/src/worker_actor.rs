//! Worker actor: one slot of a worker pool.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use queue_core::{ClaimedJob, JobEvent, QueueResult};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, MessagingErr};

use crate::event_bus::EventBus;
use crate::handler::{HandlerResult, JobHandler};
use crate::messages::{QueueMessage, WorkerMessage};

/// Exponential wait between polls of an empty queue.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl IdleBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        Self {
            min,
            max: max.max(min),
            current: min,
        }
    }

    /// The wait to use now; doubles the next one up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue_name: String,
    pub queue: ActorRef<QueueMessage>,
    pub handler: Arc<dyn JobHandler>,
    pub bus: Arc<EventBus>,
    pub backoff: IdleBackoff,
    pub rpc_timeout: Duration,
    /// Shared count of slots currently running a handler.
    pub busy: Arc<AtomicUsize>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    worker_id: String,
    queue_name: String,
    queue: ActorRef<QueueMessage>,
    handler: Arc<dyn JobHandler>,
    bus: Arc<EventBus>,
    backoff: IdleBackoff,
    rpc_timeout: Duration,
    busy: Arc<AtomicUsize>,
    running: bool,
}

impl WorkerActorState {
    fn new(args: WorkerArgs) -> Self {
        Self {
            worker_id: args.worker_id,
            queue_name: args.queue_name,
            queue: args.queue,
            handler: args.handler,
            bus: args.bus,
            backoff: args.backoff,
            rpc_timeout: args.rpc_timeout,
            busy: args.busy,
            running: true,
        }
    }

    async fn claim(&self) -> Result<CallResult<Option<ClaimedJob>>, MessagingErr<QueueMessage>> {
        ractor::rpc::call(
            &self.queue,
            |reply| QueueMessage::ClaimNext {
                worker_id: self.worker_id.clone(),
                reply,
            },
            Some(self.rpc_timeout),
        )
        .await
    }

    /// Run the handler on a claimed job and report the outcome.
    ///
    /// Panics count as failures. A handler that outlives its lease still
    /// reports; the queue rejects the stale claim and the report is dropped.
    async fn execute(&self, claimed: ClaimedJob) {
        let ClaimedJob { job, claim } = claimed;
        tracing::debug!(
            "{} running job {} (attempt {}/{})",
            self.worker_id,
            job.id,
            claim.attempt,
            job.max_attempts
        );

        self.busy.fetch_add(1, Ordering::SeqCst);
        let handler = Arc::clone(&self.handler);
        let outcome: HandlerResult = AssertUnwindSafe(async move { handler.handle(&job).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_message(panic)));
        self.busy.fetch_sub(1, Ordering::SeqCst);

        let job_id = claim.job_id;
        let report = match outcome {
            Ok(result) => {
                ractor::rpc::call(
                    &self.queue,
                    |reply| QueueMessage::Complete {
                        claim,
                        result,
                        reply,
                    },
                    Some(self.rpc_timeout),
                )
                .await
            }
            Err(error) => {
                tracing::debug!("{} job {} failed: {}", self.worker_id, job_id, error);
                ractor::rpc::call(
                    &self.queue,
                    |reply| QueueMessage::Fail {
                        claim,
                        error,
                        reply,
                    },
                    Some(self.rpc_timeout),
                )
                .await
            }
        };

        self.log_report(job_id, report);
    }

    fn log_report(
        &self,
        job_id: queue_core::JobId,
        report: Result<CallResult<QueueResult<()>>, MessagingErr<QueueMessage>>,
    ) {
        match report {
            Ok(CallResult::Success(Ok(()))) => {}
            Ok(CallResult::Success(Err(e))) if e.is_stale_report() => {
                tracing::debug!("{} dropped stale report for job {}: {}", self.worker_id, job_id, e);
            }
            Ok(CallResult::Success(Err(e))) => {
                tracing::warn!("{} could not report job {}: {}", self.worker_id, job_id, e);
            }
            Ok(CallResult::Timeout) => {
                tracing::warn!("{} timed out reporting job {}", self.worker_id, job_id);
            }
            Ok(CallResult::SenderError) | Err(_) => {
                tracing::warn!(
                    "{} could not report job {}: queue '{}' is gone",
                    self.worker_id,
                    job_id,
                    self.queue_name
                );
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}

/// Poll again after `delay` without blocking the mailbox.
fn poll_after(myself: &ActorRef<WorkerMessage>, delay: Duration) {
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = myself.send_message(WorkerMessage::Poll);
    });
}

/// Worker actor that claims and executes jobs from one queue.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);
        Ok(WorkerActorState::new(args))
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.bus.emit(JobEvent::WorkerConnected {
            worker_id: state.worker_id.clone(),
            queue: state.queue_name.clone(),
            timestamp: Utc::now(),
        });
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.bus.emit(JobEvent::WorkerDisconnected {
            worker_id: state.worker_id.clone(),
            queue: state.queue_name.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.running {
                    return Ok(());
                }

                match state.claim().await {
                    Ok(CallResult::Success(Some(claimed))) => {
                        state.backoff.reset();
                        state.execute(claimed).await;
                        myself.send_message(WorkerMessage::Poll)?;
                    }
                    Ok(CallResult::Success(None)) => {
                        poll_after(&myself, state.backoff.next_delay());
                    }
                    Ok(CallResult::Timeout) => {
                        tracing::warn!("{} timed out claiming from '{}'", state.worker_id, state.queue_name);
                        poll_after(&myself, state.backoff.next_delay());
                    }
                    Ok(CallResult::SenderError) | Err(_) => {
                        tracing::info!(
                            "Queue '{}' is gone, stopping worker {}",
                            state.queue_name,
                            state.worker_id
                        );
                        state.running = false;
                        myself.stop(None);
                    }
                }
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                state.running = false;
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }
}
