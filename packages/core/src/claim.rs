//! Claims: exclusive, time-bounded rights to execute one job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId};

/// An exclusive lease on an active job.
///
/// A claim is identified by `(worker_id, attempt)`; attempts grow on every
/// claim, so a reclaimed job never matches its previous claim again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub job_id: JobId,
    pub worker_id: String,
    pub attempt: u32,
    pub lease_expiry: DateTime<Utc>,
}

impl Claim {
    /// Whether the lease has run out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expiry < now
    }

    /// Whether `other` refers to the same claim.
    pub fn matches(&self, other: &Claim) -> bool {
        self.job_id == other.job_id
            && self.worker_id == other.worker_id
            && self.attempt == other.attempt
    }
}

/// A job handed to a worker together with the claim it must report back with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub job: Job,
    pub claim: Claim,
}
