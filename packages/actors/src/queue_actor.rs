//! Queue actor: the single writer of one queue's state.

use std::sync::Arc;

use chrono::Utc;
use db::repositories::{JobRepository, QueueRepository};
use queue_core::{
    Claim, FailOutcome, Job, JobEvent, JobOutcome, JobQueue, JobState, QueueConfig, QueueError,
    QueueInfo, QueueResult,
};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::event_bus::EventBus;
use crate::messages::QueueMessage;

const ALL_STATES: [JobState; 5] = [
    JobState::Delayed,
    JobState::Waiting,
    JobState::Active,
    JobState::Completed,
    JobState::Failed,
];

/// Arguments for spawning a queue actor.
pub struct QueueActorArgs {
    pub name: String,
    pub config: QueueConfig,
    pub bus: Arc<EventBus>,
    /// Write every transition through to the durable store.
    pub persist: bool,
}

/// State for the queue actor.
pub struct QueueActorState {
    queue: JobQueue,
    bus: Arc<EventBus>,
    persist: bool,
}

impl QueueActorState {
    fn name(&self) -> &str {
        self.queue.name()
    }

    fn emit(&self, event: JobEvent) {
        self.bus.emit(event);
    }

    /// Write a transitioned job through to the store. The in-memory state
    /// stays authoritative if the write fails.
    async fn store(&self, job: &Job) {
        if !self.persist {
            return;
        }
        if let Err(e) = JobRepository::save(job).await {
            tracing::warn!("Failed to persist job {} ({}): {}", job.id, job.state, e);
        }
    }

    async fn archive(&self, job: &Job) {
        if !self.persist {
            return;
        }
        if let Err(e) = JobRepository::archive(job).await {
            tracing::warn!("Failed to archive job {}: {}", job.id, e);
        }
    }

    async fn enqueue(
        &mut self,
        payload: serde_json::Value,
        options: &queue_core::EnqueueOptions,
    ) -> QueueResult<Job> {
        let now = Utc::now();
        let job = self.queue.prepare(payload, options, now)?;

        if self.persist {
            JobRepository::create(&job)
                .await
                .map_err(|e| QueueError::Database(format!("Failed to persist job: {}", e)))?;
        }

        self.queue.admit(job.clone());
        tracing::debug!("Job {} enqueued on '{}' ({})", job.id, self.name(), job.state);
        self.emit(JobEvent::JobEnqueued {
            job: job.clone(),
            timestamp: now,
        });
        Ok(job)
    }

    async fn complete(
        &mut self,
        claim: &Claim,
        result: Option<serde_json::Value>,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let job = self.queue.complete(claim, result, now)?;
        self.store(&job).await;

        let outcome = JobOutcome::Completed {
            result: job.result.clone(),
        };
        self.bus.publish(job.id, &outcome);

        let duration_ms = claim
            .lease_expiry
            .checked_sub_signed(self.queue.config().lease())
            .map_or(0, |claimed_at| (now - claimed_at).num_milliseconds().max(0) as u64);
        self.emit(JobEvent::JobCompleted {
            job_id: job.id,
            queue: job.queue,
            duration_ms,
            timestamp: now,
        });
        Ok(())
    }

    async fn fail(&mut self, claim: &Claim, error: String) -> QueueResult<()> {
        let now = Utc::now();
        let outcome = self.queue.fail(claim, error.clone(), now)?;
        let job = outcome.job();
        self.store(job).await;

        if let FailOutcome::Failed(job) = &outcome {
            tracing::warn!(
                "Job {} on '{}' failed after {} attempt(s): {}",
                job.id,
                job.queue,
                job.attempts,
                error
            );
            self.bus
                .publish(job.id, &JobOutcome::Failed { error: error.clone() });
        }

        self.emit(JobEvent::JobFailed {
            job_id: job.id,
            queue: job.queue.clone(),
            error,
            attempts: job.attempts,
            will_retry: outcome.will_retry(),
            timestamp: now,
        });
        Ok(())
    }

    /// Promote due jobs, reclaim expired claims and prune old terminal jobs.
    async fn tick(&mut self) {
        let now = Utc::now();

        for job_id in self.queue.promote_due(now) {
            if let Some(job) = self.queue.get(&job_id).cloned() {
                self.store(&job).await;
            }
            self.emit(JobEvent::JobPromoted {
                job_id,
                queue: self.name().to_string(),
                timestamp: now,
            });
        }

        for claim in self.queue.reclaim_stalled(now) {
            tracing::warn!(
                "Lease of {} on job {} expired, returning it to '{}'",
                claim.worker_id,
                claim.job_id,
                self.name()
            );
            if let Some(job) = self.queue.get(&claim.job_id).cloned() {
                self.store(&job).await;
            }
            self.emit(JobEvent::JobStalled {
                job_id: claim.job_id,
                queue: self.name().to_string(),
                worker_id: claim.worker_id,
                timestamp: now,
            });
        }

        for job in self.queue.prune_finished(now) {
            self.archive(&job).await;
            self.emit(JobEvent::JobPruned {
                job_id: job.id,
                queue: job.queue,
                timestamp: now,
            });
        }
    }
}

/// Rebuild a queue from its stored jobs.
async fn restore(queue: &mut JobQueue) -> Result<usize, ActorProcessingErr> {
    let stored = JobRepository::list_for_queue(queue.name(), &ALL_STATES).await?;
    let count = stored.len();
    let now = Utc::now();

    for job in stored {
        if let Some(changed) = queue.restore(job, now) {
            tracing::info!("Job {} was active before restart, requeued", changed.id);
            JobRepository::save(&changed).await?;
        }
    }
    Ok(count)
}

/// Queue actor that manages a single queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.name);

        let mut queue = JobQueue::new(&args.name, args.config);
        if args.persist {
            QueueRepository::save(&args.name, queue.config()).await?;
            let restored = restore(&mut queue).await?;
            if restored > 0 {
                tracing::info!("Restored {} job(s) into '{}'", restored, args.name);
            }
        }

        args.bus.emit(JobEvent::QueueCreated {
            queue: args.name,
            timestamp: Utc::now(),
        });

        Ok(QueueActorState {
            queue,
            bus: args.bus,
            persist: args.persist,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue {
                payload,
                options,
                reply,
            } => {
                let result = state.enqueue(payload, &options).await;
                let _ = reply.send(result);
            }

            QueueMessage::ClaimNext { worker_id, reply } => {
                let now = Utc::now();
                let lease = state.queue.config().lease();
                let claimed = state.queue.claim_next(&worker_id, lease, now);

                if let Some(claimed) = &claimed {
                    state.store(&claimed.job).await;
                    state.emit(JobEvent::JobClaimed {
                        job_id: claimed.job.id,
                        queue: claimed.job.queue.clone(),
                        worker_id,
                        attempt: claimed.claim.attempt,
                        timestamp: now,
                    });
                }
                let _ = reply.send(claimed);
            }

            QueueMessage::Complete {
                claim,
                result,
                reply,
            } => {
                let outcome = state.complete(&claim, result).await;
                if let Err(e) = &outcome {
                    tracing::debug!("Rejected completion of job {}: {}", claim.job_id, e);
                }
                let _ = reply.send(outcome);
            }

            QueueMessage::Fail {
                claim,
                error,
                reply,
            } => {
                let outcome = state.fail(&claim, error).await;
                if let Err(e) = &outcome {
                    tracing::debug!("Rejected failure of job {}: {}", claim.job_id, e);
                }
                let _ = reply.send(outcome);
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.queue.get(&job_id).cloned());
            }

            QueueMessage::ListJobs {
                state: filter,
                limit,
                reply,
            } => {
                let _ = reply.send(state.queue.list(filter, limit));
            }

            QueueMessage::GetInfo { reply } => {
                let _ = reply.send(QueueInfo {
                    name: state.name().to_string(),
                    config: state.queue.config().clone(),
                    stats: state.queue.stats(),
                    workers: 0,
                });
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.queue.stats());
            }

            QueueMessage::Tick => {
                state.tick().await;
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue: {}", state.name());
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }
}
