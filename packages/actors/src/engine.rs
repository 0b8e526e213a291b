//! Producer, worker-registration and introspection API.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use db::DbError;
use db::repositories::{JobFilter, JobHistoryRecord, JobRepository, QueueRepository};
use queue_core::{
    EnqueueOptions, Job, JobEvent, JobId, JobOutcome, JobState, QueueConfig, QueueError,
    QueueInfo, QueueResult, QueueStats,
};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::event_bus::{EventBus, Subscription};
use crate::handler::JobHandler;
use crate::messages::{QueueMessage, SupervisorMessage};
use crate::registry::ActorRegistry;
use crate::supervisor::{Supervisor, SupervisorArgs};

fn db_error(e: DbError) -> QueueError {
    QueueError::Database(e.to_string())
}

/// Send a request to an actor and wait for its reply.
async fn request<M, T>(
    actor: &ActorRef<M>,
    timeout: Duration,
    build: impl FnOnce(RpcReplyPort<T>) -> M,
) -> QueueResult<T>
where
    M: ractor::Message,
    T: Send + 'static,
{
    match ractor::rpc::call(actor, build, Some(timeout)).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(QueueError::Actor("request timed out".into())),
        Ok(CallResult::SenderError) => Err(QueueError::Actor("actor dropped the request".into())),
        Err(e) => Err(QueueError::Actor(e.to_string())),
    }
}

struct EngineInner {
    config: EngineConfig,
    supervisor: ActorRef<SupervisorMessage>,
    registry: Arc<ActorRegistry>,
    bus: Arc<EventBus>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running job engine. Cheap to clone.
///
/// ```ignore
/// let engine = Engine::start(EngineConfig::default()).await?;
/// engine
///     .register_handler("send_email", 2, job_handler!(|job| Ok(None)))
///     .await?;
/// let job = engine
///     .enqueue("send_email", json!({"type": "welcome"}), EnqueueOptions::new())
///     .await?;
/// let outcome = engine.await_terminal(job.id, Duration::from_secs(1)).await?;
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Connect the store (if configured) and start the supervisor.
    pub async fn start(config: EngineConfig) -> QueueResult<Self> {
        config.validate()?;
        if let Some(db_config) = &config.db {
            db::init(db_config.clone()).await.map_err(db_error)?;
        }

        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ActorRegistry::new());
        let args = SupervisorArgs {
            config: config.clone(),
            bus: Arc::clone(&bus),
            registry: Arc::clone(&registry),
        };

        let (supervisor, handle) = Actor::spawn(None, Supervisor, args)
            .await
            .map_err(|e| QueueError::Actor(format!("Failed to start supervisor: {}", e)))?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                supervisor,
                registry,
                bus,
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn rpc_timeout(&self) -> Duration {
        self.inner.config.rpc_timeout
    }

    fn persist(&self) -> bool {
        self.inner.config.db.is_some()
    }

    /// Start a queue, or return the running one. `config` only applies when
    /// the queue is not running yet.
    pub async fn open_queue(&self, name: &str, config: Option<QueueConfig>) -> QueueResult<()> {
        self.queue_ref(name, config).await.map(|_| ())
    }

    async fn queue_ref(
        &self,
        name: &str,
        config: Option<QueueConfig>,
    ) -> QueueResult<ActorRef<QueueMessage>> {
        if let Some(queue) = self.inner.registry.get_queue(name) {
            return Ok(queue);
        }
        request(&self.inner.supervisor, self.rpc_timeout(), |reply| {
            SupervisorMessage::OpenQueue {
                name: name.to_string(),
                config,
                reply,
            }
        })
        .await?
    }

    /// Succeeds when `name` is not running but has a stored record.
    async fn ensure_stored(&self, name: &str) -> QueueResult<()> {
        if self.persist() && QueueRepository::exists(name).await.map_err(db_error)? {
            Ok(())
        } else {
            Err(QueueError::QueueNotFound(name.to_string()))
        }
    }

    /// Add a job to `queue`, opening the queue if needed.
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> QueueResult<Job> {
        let queue = self.queue_ref(queue, None).await?;
        request(&queue, self.rpc_timeout(), |reply| QueueMessage::Enqueue {
            payload,
            options,
            reply,
        })
        .await?
    }

    /// Attach a pool of `concurrency` worker slots running `handler` to
    /// `queue`. A queue has at most one pool.
    pub async fn register_handler<H: JobHandler>(
        &self,
        queue: &str,
        concurrency: usize,
        handler: H,
    ) -> QueueResult<()> {
        let handler: Arc<dyn JobHandler> = Arc::new(handler);
        request(&self.inner.supervisor, self.rpc_timeout(), |reply| {
            SupervisorMessage::RegisterHandler {
                queue: queue.to_string(),
                concurrency,
                handler,
                reply,
            }
        })
        .await?
    }

    /// Wait until `job_id` completes or fails terminally.
    ///
    /// Returns at once for a job that is already terminal, including one
    /// that was pruned into the store's history. On `Timeout` the job keeps
    /// running; only the wait is abandoned.
    pub async fn await_terminal(&self, job_id: JobId, timeout: Duration) -> QueueResult<JobOutcome> {
        // Register before reading the job so a concurrent publish is not missed.
        let mut subscription = self.subscribe(job_id);

        let Some(job) = self.get_job(job_id).await? else {
            return self
                .archived_outcome(job_id)
                .await?
                .ok_or(QueueError::NotFound(job_id));
        };
        if let Some(outcome) = job.outcome() {
            return Ok(outcome);
        }

        tokio::time::timeout(timeout, subscription.recv())
            .await
            .map_err(|_| QueueError::Timeout(job_id))?
    }

    /// Register a waiter for the terminal outcome of `job_id`.
    pub fn subscribe(&self, job_id: JobId) -> Subscription {
        self.inner.bus.subscribe(job_id)
    }

    /// Listen to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.bus.listen()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Find a job in any running queue, then in the store.
    pub async fn get_job(&self, job_id: JobId) -> QueueResult<Option<Job>> {
        for (_, queue) in self.inner.registry.queues() {
            let found = request(&queue, self.rpc_timeout(), |reply| QueueMessage::GetJob {
                job_id,
                reply,
            })
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        if self.persist() {
            return match JobRepository::get(job_id).await {
                Ok(job) => Ok(Some(job)),
                Err(DbError::NotFound(_)) => Ok(None),
                Err(e) => Err(db_error(e)),
            };
        }
        Ok(None)
    }

    async fn archived_outcome(&self, job_id: JobId) -> QueueResult<Option<JobOutcome>> {
        if !self.persist() {
            return Ok(None);
        }
        let Some(record) = JobRepository::history_of(job_id).await.map_err(db_error)? else {
            return Ok(None);
        };
        record.outcome().map(Some).map_err(db_error)
    }

    /// List jobs of a queue, optionally filtered by state.
    ///
    /// A queue that is not running is read from the store, most recently
    /// updated first.
    pub async fn list_jobs(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> QueueResult<Vec<Job>> {
        if let Some(actor) = self.inner.registry.get_queue(queue) {
            return request(&actor, self.rpc_timeout(), |reply| QueueMessage::ListJobs {
                state,
                limit,
                reply,
            })
            .await;
        }

        self.ensure_stored(queue).await?;
        JobRepository::list(JobFilter {
            queue: Some(queue.to_string()),
            state,
            limit: Some(limit),
        })
        .await
        .map_err(db_error)
    }

    /// Counts per state. For a queue that is not running the counts come
    /// from the store, and the lifetime totals only cover unarchived jobs.
    pub async fn queue_stats(&self, queue: &str) -> QueueResult<QueueStats> {
        if let Some(actor) = self.inner.registry.get_queue(queue) {
            return request(&actor, self.rpc_timeout(), |reply| QueueMessage::GetStats { reply })
                .await;
        }

        self.ensure_stored(queue).await?;
        let counts = JobRepository::count_by_state(queue)
            .await
            .map_err(db_error)?;
        let count = |state: JobState| counts.get(state.as_str()).copied().unwrap_or(0);

        Ok(QueueStats {
            delayed: count(JobState::Delayed),
            waiting: count(JobState::Waiting),
            active: count(JobState::Active),
            completed: count(JobState::Completed),
            failed: count(JobState::Failed),
            completed_total: count(JobState::Completed),
            failed_total: count(JobState::Failed),
            last_error: None,
        })
    }

    /// All running queues with their stats and pool sizes, ordered by name.
    pub async fn list_queues(&self) -> QueueResult<Vec<QueueInfo>> {
        request(&self.inner.supervisor, self.rpc_timeout(), |reply| {
            SupervisorMessage::ListQueues { reply }
        })
        .await
    }

    /// Archived terminal jobs of `queue`, newest first. Empty without a store.
    pub async fn history(&self, queue: &str, limit: usize) -> QueueResult<Vec<JobHistoryRecord>> {
        if !self.persist() {
            return Ok(Vec::new());
        }
        JobRepository::history(queue, limit).await.map_err(db_error)
    }

    /// Stop every worker pool and queue, then the supervisor.
    pub async fn shutdown(&self) {
        let _ = self
            .inner
            .supervisor
            .send_message(SupervisorMessage::Shutdown);

        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
