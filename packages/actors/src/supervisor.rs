//! Supervisor actor for managing all queues and worker pools.

use std::collections::HashMap;
use std::sync::Arc;

use db::repositories::QueueRepository;
use queue_core::{QueueConfig, QueueError, QueueInfo, QueueResult};
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};

use crate::config::EngineConfig;
use crate::event_bus::EventBus;
use crate::handler::JobHandler;
use crate::messages::{QueueMessage, SupervisorMessage};
use crate::queue_actor::{QueueActor, QueueActorArgs};
use crate::registry::ActorRegistry;
use crate::timer_wheel::TimerWheel;
use crate::worker_pool::{PoolArgs, WorkerPool};

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub config: EngineConfig,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ActorRegistry>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    config: EngineConfig,
    bus: Arc<EventBus>,
    registry: Arc<ActorRegistry>,
    /// Worker pools by queue name.
    pools: HashMap<String, WorkerPool>,
    /// Kept alive for as long as the supervisor runs.
    timer: TimerWheel,
}

impl SupervisorState {
    fn persist(&self) -> bool {
        self.config.db.is_some()
    }

    /// Explicit config first, then the stored one, then the engine default.
    async fn resolve_config(&self, name: &str, config: Option<QueueConfig>) -> QueueConfig {
        if let Some(config) = config {
            return config;
        }
        if self.persist()
            && let Ok(stored) = QueueRepository::get(name).await
        {
            return stored.config;
        }
        self.config.queue.clone()
    }

    async fn open_queue(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        name: &str,
        config: Option<QueueConfig>,
    ) -> QueueResult<ActorRef<QueueMessage>> {
        if let Some(queue) = self.registry.get_queue(name) {
            return Ok(queue);
        }
        if name.trim().is_empty() {
            return Err(QueueError::InvalidArgument(
                "queue name must not be empty".into(),
            ));
        }

        let config = self.resolve_config(name, config).await;
        config.validate()?;

        let args = QueueActorArgs {
            name: name.to_string(),
            config,
            bus: Arc::clone(&self.bus),
            persist: self.persist(),
        };

        let (queue, _handle) = Actor::spawn_linked(None, QueueActor, args, myself.get_cell())
            .await
            .map_err(|e| QueueError::Actor(format!("Failed to spawn queue '{}': {}", name, e)))?;

        self.registry.register_queue(name, queue.clone());
        Ok(queue)
    }

    async fn register_handler(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        queue_name: String,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<()> {
        if self.pools.contains_key(&queue_name) {
            return Err(QueueError::InvalidArgument(format!(
                "queue '{}' already has a worker pool",
                queue_name
            )));
        }

        let queue = self.open_queue(myself, &queue_name, None).await?;
        let config = queue_info(&queue).await?.config;

        let pool = WorkerPool::spawn(
            PoolArgs {
                queue_name: queue_name.clone(),
                queue,
                config,
                concurrency,
                handler,
                bus: Arc::clone(&self.bus),
                rpc_timeout: self.config.rpc_timeout,
            },
            myself.get_cell(),
        )
        .await?;

        self.pools.insert(queue_name, pool);
        Ok(())
    }

    async fn list_queues(&self) -> Vec<QueueInfo> {
        let mut queues = Vec::new();
        for (name, queue) in self.registry.queues() {
            match queue_info(&queue).await {
                Ok(mut info) => {
                    info.workers = self.pools.get(&name).map_or(0, WorkerPool::size);
                    queues.push(info);
                }
                Err(e) => tracing::warn!("Failed to read queue '{}': {}", name, e),
            }
        }
        queues
    }
}

async fn queue_info(queue: &ActorRef<QueueMessage>) -> QueueResult<QueueInfo> {
    let (tx, rx) = ractor::concurrency::oneshot();
    queue
        .send_message(QueueMessage::GetInfo { reply: tx.into() })
        .map_err(|e| QueueError::Actor(e.to_string()))?;
    rx.await
        .map_err(|_| QueueError::Actor("queue actor dropped the reply".into()))
}

/// Supervisor actor that manages all queues.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting job queue supervisor (tick every {:?})",
            args.config.poll_interval
        );

        let timer = TimerWheel::start(args.config.poll_interval, myself);

        Ok(SupervisorState {
            config: args.config,
            bus: args.bus,
            registry: args.registry,
            pools: HashMap::new(),
            timer,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.timer.stop();
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::OpenQueue {
                name,
                config,
                reply,
            } => {
                let result = state.open_queue(&myself, &name, config).await;
                let _ = reply.send(result);
            }

            SupervisorMessage::RegisterHandler {
                queue,
                concurrency,
                handler,
                reply,
            } => {
                let result = state
                    .register_handler(&myself, queue, concurrency, handler)
                    .await;
                let _ = reply.send(result);
            }

            SupervisorMessage::ListQueues { reply } => {
                let _ = reply.send(state.list_queues().await);
            }

            SupervisorMessage::Tick => {
                for (_, queue) in state.registry.queues() {
                    let _ = queue.send_message(QueueMessage::Tick);
                }
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.timer.stop();
                for pool in state.pools.values() {
                    pool.shutdown();
                }
                for queue in state.registry.drain() {
                    let _ = queue.send_message(QueueMessage::Shutdown);
                }
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some(queue) = state.registry.unregister_actor(cell.get_id()) {
                    tracing::info!("Queue actor '{}' stopped: {:?}", queue, reason);
                }
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                tracing::warn!(
                    "Child actor {} failed: {}",
                    cell.get_name().unwrap_or_else(|| cell.get_id().to_string()),
                    err
                );
                if let Some(queue) = state.registry.unregister_actor(cell.get_id())
                    && let Some(pool) = state.pools.remove(&queue)
                {
                    pool.shutdown();
                }
            }
            _ => {}
        }
        Ok(())
    }
}
