//! Queue configuration, statistics and introspection types.

use serde::{Deserialize, Serialize};

use crate::{QueueError, QueueResult};

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a claim stays valid before the job counts as stalled (ms).
    pub lease_ms: u64,
    /// Default max attempts for jobs enqueued without an explicit value.
    pub default_max_attempts: u32,
    /// First idle wait of a worker slot that found no job (ms).
    pub idle_backoff_ms: u64,
    /// Upper bound for the idle wait, which doubles while the queue stays empty (ms).
    pub max_idle_backoff_ms: u64,
    /// How long terminal jobs stay visible for introspection (secs).
    pub retention_secs: u64,
    /// Maximum number of terminal jobs kept for introspection.
    pub max_retained: usize,
    /// Maximum number of non-terminal jobs that can be queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ms: 30_000,
            default_max_attempts: 1,
            idle_backoff_ms: 50,
            max_idle_backoff_ms: 1_000,
            retention_secs: 86_400,
            max_retained: 1_000,
            max_queue_size: None,
        }
    }
}

impl QueueConfig {
    /// Set the lease duration.
    pub fn with_lease_ms(mut self, lease_ms: u64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    /// Set the default max attempts.
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Set the idle backoff bounds.
    pub fn with_idle_backoff_ms(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.idle_backoff_ms = min_ms;
        self.max_idle_backoff_ms = max_ms.max(min_ms);
        self
    }

    /// Set the retention window for terminal jobs.
    pub fn with_retention(mut self, retention_secs: u64, max_retained: usize) -> Self {
        self.retention_secs = retention_secs;
        self.max_retained = max_retained;
        self
    }

    /// Cap the number of non-terminal jobs.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = Some(max_queue_size);
        self
    }

    /// Reject values that cannot be used for time arithmetic.
    pub fn validate(&self) -> QueueResult<()> {
        if self.lease_ms == 0 {
            return Err(QueueError::InvalidArgument("lease_ms must be positive".into()));
        }
        if lease_delta(self.lease_ms).is_none() {
            return Err(QueueError::InvalidArgument(format!(
                "lease_ms out of range (got {})",
                self.lease_ms
            )));
        }
        if self.default_max_attempts < 1 {
            return Err(QueueError::InvalidArgument(
                "default_max_attempts must be at least 1".into(),
            ));
        }
        if retention_delta(self.retention_secs).is_none() {
            return Err(QueueError::InvalidArgument(format!(
                "retention_secs out of range (got {})",
                self.retention_secs
            )));
        }
        Ok(())
    }

    /// Lease duration, clamped to the largest representable span.
    pub fn lease(&self) -> chrono::Duration {
        lease_delta(self.lease_ms).unwrap_or(chrono::Duration::MAX)
    }

    /// Retention window, clamped to the largest representable span.
    pub fn retention(&self) -> chrono::Duration {
        retention_delta(self.retention_secs).unwrap_or(chrono::Duration::MAX)
    }
}

fn lease_delta(ms: u64) -> Option<chrono::Duration> {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
}

fn retention_delta(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
}

/// Statistics for a queue's current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Number of delayed jobs.
    pub delayed: u64,
    /// Number of jobs waiting to be claimed.
    pub waiting: u64,
    /// Number of claimed jobs.
    pub active: u64,
    /// Number of retained completed jobs.
    pub completed: u64,
    /// Number of retained failed jobs.
    pub failed: u64,
    /// Completed jobs since the queue started.
    pub completed_total: u64,
    /// Terminally failed jobs since the queue started.
    pub failed_total: u64,
    /// Most recent error recorded on any job of this queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueStats {
    /// Jobs that have not reached a terminal state.
    pub fn pending(&self) -> u64 {
        self.delayed + self.waiting + self.active
    }

}

/// Read-only view of a queue for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub config: QueueConfig,
    pub stats: QueueStats,
    /// Number of worker slots attached to the queue.
    pub workers: usize,
}
