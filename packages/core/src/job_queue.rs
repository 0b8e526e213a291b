//! Per-queue job state machine.
//!
//! `JobQueue` owns every job record of one queue together with the FIFO
//! waiting sequence, the delayed index keyed by `ready_at` and the active
//! claims. All transitions go through its methods; callers serialize access
//! (the queue actor is the only owner at runtime), so each method can assume
//! exclusive access and stays synchronous. Time is always passed in, which
//! keeps every transition deterministic under test.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::{
    Claim, ClaimedJob, EnqueueOptions, Job, JobId, JobState, QueueConfig, QueueError,
    QueueResult, QueueStats,
};

/// What happened to a job whose attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Attempts remain; the job is back at the tail of the waiting sequence.
    Retrying(Job),
    /// No attempts remain; the job is terminally failed.
    Failed(Job),
}

impl FailOutcome {
    pub fn job(&self) -> &Job {
        match self {
            FailOutcome::Retrying(job) | FailOutcome::Failed(job) => job,
        }
    }

    pub fn will_retry(&self) -> bool {
        matches!(self, FailOutcome::Retrying(_))
    }
}

/// In-memory state of a single queue.
#[derive(Debug)]
pub struct JobQueue {
    name: String,
    config: QueueConfig,
    /// All known jobs by ID, including retained terminal ones.
    jobs: HashMap<JobId, Job>,
    /// Ready jobs in claim order.
    waiting: VecDeque<JobId>,
    /// Delayed jobs keyed by ready time, ties broken by insertion sequence.
    delayed: BTreeMap<(DateTime<Utc>, u64), JobId>,
    /// Outstanding claims by job.
    active: HashMap<JobId, Claim>,
    /// Terminal jobs in the order they finished.
    finished: VecDeque<JobId>,
    next_seq: u64,
    completed_total: u64,
    failed_total: u64,
    last_error: Option<String>,
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            name: name.into(),
            config,
            jobs: HashMap::new(),
            waiting: VecDeque::new(),
            delayed: BTreeMap::new(),
            active: HashMap::new(),
            finished: VecDeque::new(),
            next_seq: 0,
            completed_total: 0,
            failed_total: 0,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Number of jobs that have not reached a terminal state.
    pub fn len(&self) -> usize {
        self.delayed.len() + self.waiting.len() + self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    /// Earliest ready time among delayed jobs.
    pub fn next_ready_at(&self) -> Option<DateTime<Utc>> {
        self.delayed.keys().next().map(|(ready_at, _)| *ready_at)
    }

    /// Validate options and build a job without admitting it.
    pub fn prepare(
        &self,
        payload: serde_json::Value,
        options: &EnqueueOptions,
        now: DateTime<Utc>,
    ) -> QueueResult<Job> {
        let delay_ms = options.delay_ms.unwrap_or(0);
        if delay_ms < 0 {
            return Err(QueueError::InvalidArgument(format!(
                "delay must not be negative (got {}ms)",
                delay_ms
            )));
        }

        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.default_max_attempts);
        if max_attempts < 1 {
            return Err(QueueError::InvalidArgument(
                "max_attempts must be at least 1".into(),
            ));
        }

        if let Some(max_size) = self.config.max_queue_size
            && self.len() >= max_size
        {
            return Err(QueueError::QueueFull(self.name.clone()));
        }

        let mut job = Job::new(&self.name, payload, now).with_max_attempts(max_attempts);
        if delay_ms > 0 {
            let ready_at = Duration::try_milliseconds(delay_ms)
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| {
                    QueueError::InvalidArgument(format!("delay out of range (got {}ms)", delay_ms))
                })?;
            job = job.with_ready_at(ready_at);
        }
        Ok(job)
    }

    /// Admit a prepared job: delayed jobs go to the delayed index, all others
    /// to the tail of the waiting sequence.
    pub fn admit(&mut self, job: Job) {
        let job_id = job.id;
        match job.state {
            JobState::Delayed => {
                let ready_at = job.ready_at.unwrap_or(job.created_at);
                self.insert_delayed(ready_at, job_id);
            }
            _ => self.waiting.push_back(job_id),
        }
        self.jobs.insert(job_id, job);
    }

    /// Validate, build and admit a job.
    pub fn enqueue(
        &mut self,
        payload: serde_json::Value,
        options: &EnqueueOptions,
        now: DateTime<Utc>,
    ) -> QueueResult<Job> {
        let job = self.prepare(payload, options, now)?;
        self.admit(job.clone());
        Ok(job)
    }

    /// Rebuild state from a stored record.
    ///
    /// Claims do not survive a restart: a stored `active` job goes back to
    /// the waiting sequence. Returns the job if its state had to change.
    pub fn restore(&mut self, mut job: Job, now: DateTime<Utc>) -> Option<Job> {
        if self.jobs.contains_key(&job.id) {
            return None;
        }

        let job_id = job.id;
        let mut changed = false;
        match job.state {
            JobState::Delayed => {
                let ready_at = job.ready_at.unwrap_or(job.created_at);
                self.insert_delayed(ready_at, job_id);
            }
            JobState::Waiting => self.waiting.push_back(job_id),
            JobState::Active => {
                job.state = JobState::Waiting;
                job.updated_at = now;
                self.waiting.push_back(job_id);
                changed = true;
            }
            JobState::Completed | JobState::Failed => self.finished.push_back(job_id),
        }

        let restored = changed.then(|| job.clone());
        self.jobs.insert(job_id, job);
        restored
    }

    /// Pop the head of the waiting sequence and hand it to `worker_id`.
    pub fn claim_next(
        &mut self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Option<ClaimedJob> {
        while let Some(job_id) = self.waiting.pop_front() {
            let Some(job) = self.jobs.get_mut(&job_id) else {
                continue;
            };
            if job.state != JobState::Waiting {
                continue;
            }

            job.state = JobState::Active;
            job.attempts = job.attempts.saturating_add(1);
            job.updated_at = now;

            let claim = Claim {
                job_id,
                worker_id: worker_id.to_string(),
                attempt: job.attempts,
                lease_expiry: now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC),
            };
            let job = job.clone();
            self.active.insert(job_id, claim.clone());
            return Some(ClaimedJob { job, claim });
        }
        None
    }

    /// Record a successful attempt.
    pub fn complete(
        &mut self,
        claim: &Claim,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> QueueResult<Job> {
        self.check_claim(claim, "complete")?;
        self.active.remove(&claim.job_id);

        let job = self
            .jobs
            .get_mut(&claim.job_id)
            .ok_or(QueueError::NotFound(claim.job_id))?;
        job.state = JobState::Completed;
        job.result = result;
        job.updated_at = now;
        let job = job.clone();

        self.finished.push_back(job.id);
        self.completed_total += 1;
        Ok(job)
    }

    /// Record a failed attempt: retry at the tail while attempts remain,
    /// otherwise fail terminally.
    pub fn fail(
        &mut self,
        claim: &Claim,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> QueueResult<FailOutcome> {
        self.check_claim(claim, "fail")?;
        self.active.remove(&claim.job_id);

        let error = error.into();
        self.last_error = Some(error.clone());

        let job = self
            .jobs
            .get_mut(&claim.job_id)
            .ok_or(QueueError::NotFound(claim.job_id))?;
        job.last_error = Some(error);
        job.updated_at = now;

        if job.has_attempts_left() {
            job.state = JobState::Waiting;
            let job = job.clone();
            self.waiting.push_back(job.id);
            Ok(FailOutcome::Retrying(job))
        } else {
            job.state = JobState::Failed;
            let job = job.clone();
            self.finished.push_back(job.id);
            self.failed_total += 1;
            Ok(FailOutcome::Failed(job))
        }
    }

    /// Move every delayed job with `ready_at <= now` to the waiting tail,
    /// in ready order.
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let mut promoted = Vec::new();
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let job_id = entry.remove();
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.state = JobState::Waiting;
                job.updated_at = now;
                self.waiting.push_back(job_id);
                promoted.push(job_id);
            }
        }
        promoted
    }

    /// Release every claim whose lease ran out before `now` and put its job
    /// back at the waiting tail. Attempts are left as counted at claim time.
    pub fn reclaim_stalled(&mut self, now: DateTime<Utc>) -> Vec<Claim> {
        let mut expired: Vec<Claim> = self
            .active
            .values()
            .filter(|claim| claim.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by(|a, b| {
            a.lease_expiry
                .cmp(&b.lease_expiry)
                .then(a.job_id.cmp(&b.job_id))
        });

        for claim in &expired {
            self.active.remove(&claim.job_id);
            if let Some(job) = self.jobs.get_mut(&claim.job_id) {
                job.state = JobState::Waiting;
                job.updated_at = now;
                self.waiting.push_back(claim.job_id);
            }
        }
        expired
    }

    /// Drop terminal jobs that fall outside the retention window.
    pub fn prune_finished(&mut self, now: DateTime<Utc>) -> Vec<Job> {
        let cutoff = now
            .checked_sub_signed(self.config.retention())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut pruned = Vec::new();

        while let Some(&job_id) = self.finished.front() {
            let expired = self
                .jobs
                .get(&job_id)
                .is_none_or(|job| job.updated_at < cutoff);
            if !expired && self.finished.len() <= self.config.max_retained {
                break;
            }
            self.finished.pop_front();
            if let Some(job) = self.jobs.remove(&job_id) {
                pruned.push(job);
            }
        }
        pruned
    }

    /// List jobs, optionally filtered by state.
    ///
    /// Order: waiting (claim order), delayed (ready order), active, then
    /// terminal jobs newest first.
    pub fn list(&self, state: Option<JobState>, limit: usize) -> Vec<Job> {
        let wants = |s: JobState| state.is_none_or(|wanted| wanted == s);

        let mut ids: Vec<JobId> = Vec::new();
        if wants(JobState::Waiting) {
            ids.extend(self.waiting.iter().copied());
        }
        if wants(JobState::Delayed) {
            ids.extend(self.delayed.values().copied());
        }
        if wants(JobState::Active) {
            let mut claims: Vec<&Claim> = self.active.values().collect();
            claims.sort_by_key(|claim| (claim.lease_expiry, claim.job_id));
            ids.extend(claims.into_iter().map(|claim| claim.job_id));
        }
        if wants(JobState::Completed) || wants(JobState::Failed) {
            ids.extend(self.finished.iter().rev().copied());
        }

        ids.into_iter()
            .filter_map(|id| self.jobs.get(&id))
            .filter(|job| wants(job.state))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Current counts per state plus lifetime totals.
    pub fn stats(&self) -> QueueStats {
        let (completed, failed) =
            self.finished
                .iter()
                .filter_map(|id| self.jobs.get(id))
                .fold((0, 0), |(c, f), job| match job.state {
                    JobState::Completed => (c + 1, f),
                    JobState::Failed => (c, f + 1),
                    _ => (c, f),
                });

        QueueStats {
            delayed: self.delayed.len() as u64,
            waiting: self.waiting.len() as u64,
            active: self.active.len() as u64,
            completed,
            failed,
            completed_total: self.completed_total,
            failed_total: self.failed_total,
            last_error: self.last_error.clone(),
        }
    }

    fn insert_delayed(&mut self, ready_at: DateTime<Utc>, job_id: JobId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.insert((ready_at, seq), job_id);
    }

    fn check_claim(&self, claim: &Claim, action: &str) -> QueueResult<()> {
        let job = self
            .jobs
            .get(&claim.job_id)
            .ok_or(QueueError::NotFound(claim.job_id))?;

        if job.state != JobState::Active {
            return Err(QueueError::invalid_state(
                job.id,
                job.state,
                format!("cannot {} a job that is not active", action),
            ));
        }

        match self.active.get(&claim.job_id) {
            Some(current) if current.matches(claim) => Ok(()),
            _ => Err(QueueError::invalid_state(
                job.id,
                job.state,
                format!(
                    "cannot {}: claim by {} (attempt {}) is stale",
                    action, claim.worker_id, claim.attempt
                ),
            )),
        }
    }
}
