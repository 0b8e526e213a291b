//! Outcome delivery to waiters and the lifecycle event stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use queue_core::{JobEvent, JobId, JobOutcome, QueueError, QueueResult};
use tokio::sync::{broadcast, oneshot};

/// Capacity of the lifecycle event channel. Slow listeners lag and skip.
const EVENT_CAPACITY: usize = 1024;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<JobOutcome>,
}

/// Maps job ids to the callers waiting for their terminal outcome.
///
/// The queue actor publishes exactly once per terminal transition; waiters
/// are removed on delivery, on drop of their [`Subscription`], or both.
pub struct EventBus {
    waiters: Mutex<HashMap<JobId, Vec<Waiter>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<JobId, Vec<Waiter>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for the terminal outcome of `job_id`.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters()
            .entry(job_id)
            .or_default()
            .push(Waiter { id, tx });

        Subscription {
            job_id,
            id,
            rx,
            bus: Arc::clone(self),
        }
    }

    /// Deliver `outcome` to every current waiter of `job_id` and forget them.
    ///
    /// Returns how many waiters received it.
    pub fn publish(&self, job_id: JobId, outcome: &JobOutcome) -> usize {
        let Some(waiters) = self.waiters().remove(&job_id) else {
            return 0;
        };

        waiters
            .into_iter()
            .map(|waiter| waiter.tx.send(outcome.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    /// Broadcast a lifecycle event. Dropped silently without listeners.
    pub fn emit(&self, event: JobEvent) {
        tracing::debug!("{}", event.description());
        let _ = self.events.send(event);
    }

    /// Listen to lifecycle events emitted after this call.
    pub fn listen(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Number of waiters registered for `job_id`.
    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.waiters().get(job_id).map_or(0, Vec::len)
    }

    /// Number of jobs with at least one waiter.
    pub fn watched_jobs(&self) -> usize {
        self.waiters().len()
    }

    fn unsubscribe(&self, job_id: &JobId, id: u64) {
        let mut waiters = self.waiters();
        if let Some(list) = waiters.get_mut(job_id) {
            list.retain(|waiter| waiter.id != id);
            if list.is_empty() {
                waiters.remove(job_id);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered waiter. Dropping it unregisters the waiter.
pub struct Subscription {
    job_id: JobId,
    id: u64,
    rx: oneshot::Receiver<JobOutcome>,
    bus: Arc<EventBus>,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the outcome to be published.
    pub async fn recv(&mut self) -> QueueResult<JobOutcome> {
        (&mut self.rx)
            .await
            .map_err(|_| QueueError::Actor(format!("waiter for job {} was dropped", self.job_id)))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.job_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn publish_reaches_every_waiter_once() {
        let bus = Arc::new(EventBus::new());
        let job_id = JobId::new();
        let mut first = bus.subscribe(job_id);
        let mut second = bus.subscribe(job_id);
        assert_eq!(bus.subscriber_count(&job_id), 2);

        let outcome = JobOutcome::Completed { result: None };
        assert_eq!(bus.publish(job_id, &outcome), 2);
        assert_eq!(first.recv().await, Ok(outcome.clone()));
        assert_eq!(second.recv().await, Ok(outcome.clone()));

        assert_eq!(bus.subscriber_count(&job_id), 0);
        assert_eq!(bus.publish(job_id, &outcome), 0);
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let bus = Arc::new(EventBus::new());
        let job_id = JobId::new();

        let kept = bus.subscribe(job_id);
        {
            let _dropped = bus.subscribe(job_id);
            assert_eq!(bus.subscriber_count(&job_id), 2);
        }
        assert_eq!(bus.subscriber_count(&job_id), 1);

        drop(kept);
        assert_eq!(bus.subscriber_count(&job_id), 0);
        assert_eq!(bus.watched_jobs(), 0);
    }

    #[tokio::test]
    async fn timed_out_wait_leaves_no_waiter() {
        let bus = Arc::new(EventBus::new());
        let job_id = JobId::new();

        let mut subscription = bus.subscribe(job_id);
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(10), subscription.recv()).await;
        assert!(waited.is_err());
        drop(subscription);

        assert_eq!(bus.watched_jobs(), 0);
    }

    #[tokio::test]
    async fn listeners_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.listen();
        bus.emit(JobEvent::QueueCreated {
            queue: "send_email".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.queue(), "send_email");
    }
}
