//! Directory of running queue actors.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ractor::{ActorId, ActorRef};

use crate::messages::QueueMessage;

/// Maps queue names to their actors.
///
/// Each engine owns one registry, so producers can reach a queue actor
/// without a round trip through the supervisor.
#[derive(Default)]
pub struct ActorRegistry {
    queues: RwLock<BTreeMap<String, ActorRef<QueueMessage>>>,
}

impl ActorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ActorRef<QueueMessage>>> {
        self.queues.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ActorRef<QueueMessage>>> {
        self.queues.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a queue actor.
    pub fn register_queue(&self, name: &str, queue: ActorRef<QueueMessage>) {
        self.write().insert(name.to_string(), queue);
    }

    /// Unregister whichever queue is served by the actor `id`.
    pub fn unregister_actor(&self, id: ActorId) -> Option<String> {
        let mut queues = self.write();
        let name = queues
            .iter()
            .find(|(_, actor)| actor.get_id() == id)
            .map(|(name, _)| name.clone())?;
        queues.remove(&name);
        Some(name)
    }

    /// Get a queue actor by name.
    pub fn get_queue(&self, name: &str) -> Option<ActorRef<QueueMessage>> {
        self.read().get(name).cloned()
    }

    /// All registered queues, ordered by name.
    pub fn queues(&self) -> Vec<(String, ActorRef<QueueMessage>)> {
        self.read()
            .iter()
            .map(|(name, actor)| (name.clone(), actor.clone()))
            .collect()
    }

    /// Remove every entry, returning the actors that were registered.
    pub fn drain(&self) -> Vec<ActorRef<QueueMessage>> {
        std::mem::take(&mut *self.write()).into_values().collect()
    }
}
