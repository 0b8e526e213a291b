#![allow(clippy::disallowed_methods)]

mod common;

use chrono::{Duration, Utc};
use queue_core::{EnqueueOptions, Job, JobOutcome, JobQueue, JobState, QueueConfig};
use serde_json::json;
use std::error::Error;

use db::{
    DbError,
    repositories::{JobFilter, JobRepository, QueueRepository},
};

fn job_in(queue: &str, payload: serde_json::Value) -> Job {
    Job::new(queue, payload, Utc::now())
}

#[test]
fn test_queue_repository() -> Result<(), Box<dyn Error>> {
    common::block_on(async {
        let _guard = common::setup_db().await?;

        let config = QueueConfig::default().with_lease_ms(5_000);
        let created = QueueRepository::save("send_email", &config).await?;
        assert_eq!(created.name, "send_email");
        assert_eq!(created.config.lease_ms, 5_000);

        let updated = QueueRepository::save("send_email", &config.clone().with_default_max_attempts(3))
            .await?;
        assert_eq!(updated.config.default_max_attempts, 3);
        assert_eq!(updated.created_at, created.created_at);

        assert!(QueueRepository::exists("send_email").await?);
        assert!(!QueueRepository::exists("log_activity").await?);
        assert!(matches!(
            QueueRepository::get("log_activity").await,
            Err(DbError::NotFound(_))
        ));

        Ok::<_, Box<dyn Error>>(())
    })
}

#[test]
fn test_job_repository() -> Result<(), Box<dyn Error>> {
    common::block_on(async {
        let _guard = common::setup_db().await?;

        // create/get preserve the record
        let job = job_in("send_email", json!({"type": "welcome", "email": "a@example.com"}))
            .with_max_attempts(3);
        JobRepository::create(&job).await?;

        let loaded = JobRepository::get(job.id).await?;
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.queue, "send_email");
        assert_eq!(loaded.payload, job.payload);
        assert_eq!(loaded.state, JobState::Waiting);
        assert_eq!(loaded.max_attempts, 3);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            job.created_at.timestamp_millis()
        );

        // update/save overwrite mutable fields
        let mut active = loaded.clone();
        active.state = JobState::Active;
        active.attempts = 1;
        let updated = JobRepository::update(&active).await?;
        assert_eq!(updated.state, JobState::Active);
        assert_eq!(updated.attempts, 1);

        let missing = job_in("send_email", json!(null));
        assert!(matches!(
            JobRepository::update(&missing).await,
            Err(DbError::NotFound(_))
        ));
        JobRepository::save(&missing).await?;
        assert_eq!(JobRepository::get(missing.id).await?.payload, json!(null));

        JobRepository::delete(missing.id).await?;
        assert!(matches!(
            JobRepository::get(missing.id).await,
            Err(DbError::NotFound(_))
        ));

        Ok::<_, Box<dyn Error>>(())
    })
}

#[test]
fn test_restore_order_and_filters() -> Result<(), Box<dyn Error>> {
    common::block_on(async {
        let _guard = common::setup_db().await?;

        let now = Utc::now();
        let mut queue = JobQueue::new("log_activity", QueueConfig::default());
        let first = queue.enqueue(json!(1), &EnqueueOptions::new(), now)?;
        let delayed = queue.enqueue(
            json!(2),
            &EnqueueOptions::new().with_delay_ms(60_000),
            now + Duration::milliseconds(1),
        )?;
        let mut second = queue.enqueue(json!(3), &EnqueueOptions::new(), now)?;
        second.updated_at = now + Duration::milliseconds(2);

        let mut done = job_in("log_activity", json!(4));
        done.state = JobState::Completed;
        done.result = Some(json!({"ok": true}));

        let other = job_in("send_email", json!(5));

        for job in [&second, &delayed, &first, &done, &other] {
            JobRepository::create(job).await?;
        }

        let pending = JobRepository::list_for_queue(
            "log_activity",
            &[JobState::Waiting, JobState::Delayed, JobState::Active],
        )
        .await?;
        let ids: Vec<_> = pending.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first.id, delayed.id, second.id]);
        assert_eq!(
            pending[1].ready_at.map(|t| t.timestamp_millis()),
            delayed.ready_at.map(|t| t.timestamp_millis())
        );

        let completed = JobRepository::list(JobFilter {
            queue: Some("log_activity".into()),
            state: Some(JobState::Completed),
            ..Default::default()
        })
        .await?;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].result, Some(json!({"ok": true})));

        let limited = JobRepository::list(JobFilter {
            limit: Some(2),
            ..Default::default()
        })
        .await?;
        assert_eq!(limited.len(), 2);

        let counts = JobRepository::count_by_state("log_activity").await?;
        assert_eq!(counts.get("waiting").copied().unwrap_or(0), 2);
        assert_eq!(counts.get("delayed").copied().unwrap_or(0), 1);
        assert_eq!(counts.get("completed").copied().unwrap_or(0), 1);

        Ok::<_, Box<dyn Error>>(())
    })
}

#[test]
fn test_archive_moves_terminal_jobs_to_history() -> Result<(), Box<dyn Error>> {
    common::block_on(async {
        let _guard = common::setup_db().await?;

        let waiting = job_in("activate_user", json!({"userId": "u1"}));
        JobRepository::create(&waiting).await?;
        JobRepository::archive(&waiting).await?;
        assert!(JobRepository::get(waiting.id).await.is_ok());

        let mut failed = job_in("activate_user", json!({"userId": "u2"}));
        failed.state = JobState::Failed;
        failed.attempts = 2;
        failed.last_error = Some("User with ID u2 not found.".into());
        JobRepository::create(&failed).await?;

        JobRepository::archive(&failed).await?;
        assert!(matches!(
            JobRepository::get(failed.id).await,
            Err(DbError::NotFound(_))
        ));

        let history = JobRepository::history("activate_user", 10).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].job_id, failed.id.to_string());
        assert_eq!(history[0].final_state, "failed");
        assert_eq!(history[0].attempts, 2);
        assert_eq!(history[0].error.as_deref(), Some("User with ID u2 not found."));

        let archived = JobRepository::history_of(failed.id).await?.unwrap();
        assert_eq!(
            archived.outcome()?,
            JobOutcome::Failed {
                error: "User with ID u2 not found.".into()
            }
        );
        assert!(JobRepository::history_of(waiting.id).await?.is_none());

        common::reset_db().await?;
        assert!(JobRepository::history("activate_user", 10).await?.is_empty());

        Ok::<_, Box<dyn Error>>(())
    })
}
