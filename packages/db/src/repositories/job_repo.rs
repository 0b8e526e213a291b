//! Job repository for CRUD operations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobOutcome, JobState};
use serde::{Deserialize, Serialize};

use crate::{DbError, get_db};

/// Repository for job persistence operations.
pub struct JobRepository;

/// Stored shape of a job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRow {
    job_id: String,
    queue: String,
    state: String,
    payload: String,
    attempts: u32,
    max_attempts: u32,
    last_error: Option<String>,
    result: Option<String>,
    created_at_ms: i64,
    ready_at_ms: Option<i64>,
    updated_at_ms: i64,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            queue: job.queue.clone(),
            state: job.state.as_str().to_string(),
            payload: job.payload.to_string(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error.clone(),
            result: job.result.as_ref().map(|value| value.to_string()),
            created_at_ms: job.created_at.timestamp_millis(),
            ready_at_ms: job.ready_at.map(|t| t.timestamp_millis()),
            updated_at_ms: job.updated_at.timestamp_millis(),
        }
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = JobId::parse(&row.job_id)
            .map_err(|e| DbError::Serialization(format!("Invalid job ID {}: {}", row.job_id, e)))?;
        let state = JobState::parse(&row.state)
            .ok_or_else(|| DbError::Serialization(format!("Invalid job state: {}", row.state)))?;
        let payload = serde_json::from_str::<serde_json::Value>(&row.payload)?;
        let result = row
            .result
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(Job {
            id,
            queue: row.queue,
            payload,
            state,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            result,
            created_at: from_millis(row.created_at_ms)?,
            ready_at: row.ready_at_ms.map(from_millis).transpose()?,
            updated_at: from_millis(row.updated_at_ms)?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Serialization(format!("Timestamp out of range: {}", ms)))
}

/// Job history record for archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryRecord {
    pub job_id: String,
    pub queue: String,
    pub final_state: String,
    pub attempts: u32,
    pub error: Option<String>,
    pub result: Option<String>,
    pub created_at_ms: i64,
    pub finished_at_ms: i64,
    pub archived_at_ms: i64,
}

impl JobHistoryRecord {
    /// Terminal outcome recorded for the archived job.
    pub fn outcome(&self) -> Result<JobOutcome, DbError> {
        match self.final_state.as_str() {
            "completed" => {
                let result = self
                    .result
                    .as_deref()
                    .map(serde_json::from_str::<serde_json::Value>)
                    .transpose()?;
                Ok(JobOutcome::Completed { result })
            }
            "failed" => Ok(JobOutcome::Failed {
                error: self.error.clone().unwrap_or_default(),
            }),
            other => Err(DbError::Serialization(format!(
                "Invalid final state: {}",
                other
            ))),
        }
    }
}

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub queue: Option<String>,
    pub state: Option<JobState>,
    pub limit: Option<usize>,
}

impl JobRepository {
    /// Create a new job in the database.
    pub async fn create(job: &Job) -> Result<Job, DbError> {
        let db = get_db()?;

        let record: Option<JobRow> = db
            .create(("job", job.id.to_string()))
            .content(JobRow::from(job))
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
            .and_then(Job::try_from)
    }

    /// Get a job by ID.
    pub async fn get(id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let record: Option<JobRow> = db.select(("job", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
            .and_then(Job::try_from)
    }

    /// Overwrite an existing job record.
    pub async fn update(job: &Job) -> Result<Job, DbError> {
        let db = get_db()?;

        let record: Option<JobRow> = db
            .update(("job", job.id.to_string()))
            .content(JobRow::from(job))
            .await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", job.id)))
            .and_then(Job::try_from)
    }

    /// Update the record if it exists, create it otherwise.
    pub async fn save(job: &Job) -> Result<Job, DbError> {
        match Self::update(job).await {
            Err(DbError::NotFound(_)) => Self::create(job).await,
            other => other,
        }
    }

    /// Delete a job.
    pub async fn delete(id: JobId) -> Result<(), DbError> {
        let db = get_db()?;

        let _: Option<JobRow> = db.delete(("job", id.to_string())).await?;

        Ok(())
    }

    /// Load the jobs of a queue in the given states, oldest update first.
    ///
    /// This is the order in which a restarted queue rebuilds its waiting
    /// sequence.
    pub async fn list_for_queue(queue: &str, states: &[JobState]) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;
        let states: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();

        let mut result = db
            .query(
                r#"
                SELECT * FROM job
                WHERE queue = $queue AND state IN $states
                ORDER BY updated_at_ms ASC, job_id ASC
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("states", states))
            .await?;

        let records: Vec<JobRow> = result.take(0)?;

        records.into_iter().map(Job::try_from).collect()
    }

    /// List jobs with optional filtering, most recently updated first.
    pub async fn list(filter: JobFilter) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let mut conditions = Vec::new();
        let mut bindings: Vec<(&'static str, String)> = Vec::new();

        if let Some(queue) = &filter.queue {
            conditions.push("queue = $queue");
            bindings.push(("queue", queue.clone()));
        }

        if let Some(state) = &filter.state {
            conditions.push("state = $state");
            bindings.push(("state", state.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM job {} ORDER BY updated_at_ms DESC {}",
            where_clause, limit_clause
        );

        let mut result = db.query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<JobRow> = response.take(0)?;

        records.into_iter().map(Job::try_from).collect()
    }

    /// Count jobs by state for a queue.
    pub async fn count_by_state(queue: &str) -> Result<HashMap<String, u64>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT state, count() AS count
                FROM job
                WHERE queue = $queue
                GROUP BY state
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct StateCount {
            state: String,
            count: i64,
        }

        let counts: Vec<StateCount> = result.take(0)?;

        Ok(counts
            .into_iter()
            .map(|c| (c.state, c.count.max(0) as u64))
            .collect())
    }

    /// Archive a terminal job to history and delete its active record.
    ///
    /// Non-terminal jobs are left untouched.
    pub async fn archive(job: &Job) -> Result<(), DbError> {
        if !job.state.is_terminal() {
            return Ok(());
        }

        let db = get_db()?;

        let history = JobHistoryRecord {
            job_id: job.id.to_string(),
            queue: job.queue.clone(),
            final_state: job.state.as_str().to_string(),
            attempts: job.attempts,
            error: job.last_error.clone(),
            result: job.result.as_ref().map(|value| value.to_string()),
            created_at_ms: job.created_at.timestamp_millis(),
            finished_at_ms: job.updated_at.timestamp_millis(),
            archived_at_ms: Utc::now().timestamp_millis(),
        };

        let _: Option<JobHistoryRecord> = db.create("job_history").content(history).await?;

        Self::delete(job.id).await?;

        Ok(())
    }

    /// Archived jobs of a queue, most recent first.
    pub async fn history(queue: &str, limit: usize) -> Result<Vec<JobHistoryRecord>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT * FROM job_history
                WHERE queue = $queue
                ORDER BY archived_at_ms DESC
                LIMIT $limit
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("limit", limit as i64))
            .await?;

        let records: Vec<JobHistoryRecord> = result.take(0)?;

        Ok(records)
    }

    /// The archived record of a single job, if it was archived.
    pub async fn history_of(id: JobId) -> Result<Option<JobHistoryRecord>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT * FROM job_history
                WHERE job_id = $job_id
                ORDER BY archived_at_ms DESC
                LIMIT 1
                "#,
            )
            .bind(("job_id", id.to_string()))
            .await?;

        let records: Vec<JobHistoryRecord> = result.take(0)?;

        Ok(records.into_iter().next())
    }
}
