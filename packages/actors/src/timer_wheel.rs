//! Periodic tick source driving delayed-job promotion and lease expiry.

use std::time::Duration;

use ractor::ActorRef;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::messages::SupervisorMessage;

/// Sends [`SupervisorMessage::Tick`] every `interval`.
///
/// Each tick makes every queue promote due delayed jobs and reclaim expired
/// claims. A delayed job therefore becomes claimable no earlier than its
/// ready time and no later than one interval (plus mailbox latency) after
/// it. Missed ticks are delayed rather than fired in a burst.
///
/// The task stops when the wheel is dropped or the supervisor is gone.
pub struct TimerWheel {
    interval: Duration,
    handle: JoinHandle<()>,
}

impl TimerWheel {
    pub fn start(interval: Duration, target: ActorRef<SupervisorMessage>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if target.send_message(SupervisorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Self { interval, handle }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
