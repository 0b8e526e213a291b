//! Job domain types for work items in the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
///
/// `Delayed -> Waiting -> Active -> Completed | Failed`. A failed attempt with
/// attempts left goes straight back to `Waiting`, so `Failed` is always final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Delayed,
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Get a simple state string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Delayed => "delayed",
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Parse a state from its storage string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delayed" => Some(JobState::Delayed),
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a job, as delivered to waiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Failed {
        error: String,
    },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

/// Options accepted by `enqueue`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueueOptions {
    /// Delay before the job becomes ready, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<i64>,
    /// Total number of attempts allowed. Falls back to the queue default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay in milliseconds.
    pub fn with_delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// A job represents a unit of work to be executed by the queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Name of the queue this job belongs to.
    pub queue: String,
    /// Job payload as JSON.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub state: JobState,
    /// Number of times the job has been claimed.
    #[serde(default)]
    pub attempts: u32,
    /// Total number of attempts allowed.
    pub max_attempts: u32,
    /// Error recorded by the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Result stored on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job becomes ready. `None` means immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new waiting job with a single attempt.
    pub fn new(queue: impl Into<String>, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            state: JobState::Waiting,
            attempts: 0,
            max_attempts: 1,
            last_error: None,
            result: None,
            created_at: now,
            ready_at: None,
            updated_at: now,
        }
    }

    /// Set the max attempts for this job.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set when the job becomes ready. A future time makes the job delayed.
    pub fn with_ready_at(mut self, ready_at: DateTime<Utc>) -> Self {
        self.ready_at = Some(ready_at);
        if ready_at > self.created_at {
            self.state = JobState::Delayed;
        }
        self
    }

    /// Whether another attempt is allowed after the current one fails.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// The recorded outcome, if the job is terminal.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.state {
            JobState::Completed => Some(JobOutcome::Completed {
                result: self.result.clone(),
            }),
            JobState::Failed => Some(JobOutcome::Failed {
                error: self.last_error.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_at_in_future_makes_job_delayed() {
        let now = Utc::now();
        let job = Job::new("q", json!({}), now).with_ready_at(now + chrono::Duration::seconds(5));
        assert_eq!(job.state, JobState::Delayed);

        let past = Job::new("q", json!({}), now).with_ready_at(now - chrono::Duration::seconds(5));
        assert_eq!(past.state, JobState::Waiting);
    }

    #[test]
    fn outcome_only_for_terminal_states() {
        let now = Utc::now();
        let mut job = Job::new("q", json!(null), now);
        assert!(job.outcome().is_none());

        job.state = JobState::Failed;
        job.last_error = Some("boom".into());
        assert_eq!(
            job.outcome(),
            Some(JobOutcome::Failed {
                error: "boom".into()
            })
        );
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [
            JobState::Delayed,
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("paused"), None);
    }
}
