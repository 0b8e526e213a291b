mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actors::{
    Engine, EnqueueOptions, JobEvent, JobOutcome, JobState, QueueError, job_handler,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn welcome_email_completes_end_to_end() {
    let engine = common::start_engine().await;
    engine
        .register_handler(
            "send_email",
            2,
            job_handler!(|job| {
                match job.payload["type"].as_str() {
                    Some("welcome") => Ok(None),
                    other => Err(format!("unknown email type: {:?}", other)),
                }
            }),
        )
        .await
        .unwrap();

    let job = engine
        .enqueue(
            "send_email",
            json!({"type": "welcome", "email": "ada@example.com"}),
            EnqueueOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Waiting);

    let outcome = engine
        .await_terminal(job.id, Duration::from_millis(1000))
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Completed { result: None });

    let stored = engine.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);
    assert_eq!(stored.attempts, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn await_after_completion_returns_recorded_result() {
    let engine = common::start_engine().await;
    engine
        .register_handler(
            "log_activity",
            1,
            job_handler!(|job| Ok(Some(json!({"logged": job.payload["action"]})))),
        )
        .await
        .unwrap();

    let job = engine
        .enqueue("log_activity", json!({"action": "login"}), EnqueueOptions::new())
        .await
        .unwrap();
    let first = engine.await_terminal(job.id, WAIT).await.unwrap();

    let started = Instant::now();
    let second = engine
        .await_terminal(job.id, Duration::from_millis(1))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        second,
        JobOutcome::Completed {
            result: Some(json!({"logged": "login"}))
        }
    );
    assert!(started.elapsed() < Duration::from_millis(500));

    engine.shutdown().await;
}

#[tokio::test]
async fn timed_out_wait_does_not_stop_the_job() {
    let engine = common::start_engine().await;
    engine
        .register_handler(
            "slow",
            1,
            job_handler!(|job| {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(Some(job.payload))
            }),
        )
        .await
        .unwrap();

    let job = engine
        .enqueue("slow", json!({"n": 1}), EnqueueOptions::new())
        .await
        .unwrap();

    let waited = engine.await_terminal(job.id, Duration::from_millis(50)).await;
    assert_eq!(waited, Err(QueueError::Timeout(job.id)));
    assert_eq!(engine.event_bus().subscriber_count(&job.id), 0);

    let outcome = engine.await_terminal(job.id, WAIT).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            result: Some(json!({"n": 1}))
        }
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn failing_job_is_attempted_exactly_max_attempts_times() {
    let engine = common::start_engine().await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    engine
        .register_handler(
            "activate_user",
            2,
            actors::FnHandler::new(move |_job| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Box::pin(async move { Err(format!("User not found (attempt {})", n)) })
            }),
        )
        .await
        .unwrap();

    let job = engine
        .enqueue(
            "activate_user",
            json!({"userId": "missing"}),
            EnqueueOptions::new().with_max_attempts(3),
        )
        .await
        .unwrap();

    let outcome = engine.await_terminal(job.id, WAIT).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            error: "User not found (attempt 3)".into()
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let stored = engine.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.attempts, 3);

    let stats = engine.queue_stats("activate_user").await.unwrap();
    assert_eq!(stats.failed_total, 1);
    assert_eq!(stats.last_error.as_deref(), Some("User not found (attempt 3)"));

    engine.shutdown().await;
}

#[tokio::test]
async fn delayed_job_runs_within_one_tick_of_its_ready_time() {
    let engine = common::start_engine().await;
    let claimed_at = Arc::new(Mutex::new(None::<Instant>));
    let recorder = Arc::clone(&claimed_at);

    engine
        .register_handler(
            "activate_user",
            1,
            actors::FnHandler::new(move |_job| {
                recorder.lock().unwrap().get_or_insert_with(Instant::now);
                Box::pin(async { Ok(None) })
            }),
        )
        .await
        .unwrap();

    let delay = Duration::from_millis(200);
    let enqueued_at = Instant::now();
    let job = engine
        .enqueue(
            "activate_user",
            json!({"userId": "u1"}),
            EnqueueOptions::new().with_delay_ms(delay.as_millis() as i64),
        )
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Delayed);
    assert!(job.ready_at.is_some());

    let early = engine.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(early.state, JobState::Delayed);

    engine.await_terminal(job.id, WAIT).await.unwrap();

    let ran_after = claimed_at.lock().unwrap().unwrap() - enqueued_at;
    assert!(ran_after >= delay, "ran after {:?}", ran_after);
    // One tick plus scheduling slack.
    assert!(
        ran_after <= delay + common::POLL_INTERVAL + Duration::from_millis(300),
        "ran after {:?}",
        ran_after
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn expired_lease_is_reclaimed_and_late_result_ignored() {
    let engine = common::start_engine().await;
    engine
        .open_queue(
            "flaky",
            Some(common::fast_queue_config().with_lease_ms(100)),
        )
        .await
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    engine
        .register_handler(
            "flaky",
            2,
            actors::FnHandler::new(move |_job| {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                Box::pin(async move {
                    if first {
                        tokio::time::sleep(Duration::from_millis(400)).await;
                        Ok(Some(json!("late")))
                    } else {
                        Ok(Some(json!("fresh")))
                    }
                })
            }),
        )
        .await
        .unwrap();

    let job = engine
        .enqueue("flaky", json!({}), EnqueueOptions::new())
        .await
        .unwrap();

    let outcome = engine.await_terminal(job.id, WAIT).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            result: Some(json!("fresh"))
        }
    );

    // Let the first slot finish and report against its expired claim.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stored = engine.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);
    assert_eq!(stored.result, Some(json!("fresh")));
    assert_eq!(stored.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn pool_never_runs_more_jobs_than_its_slots() {
    let engine = common::start_engine().await;
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (r, p, s) = (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&seen));
    engine
        .register_handler(
            "bulk",
            3,
            actors::FnHandler::new(move |job| {
                let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
                s.lock().unwrap().push(job.id);
                Box::pin(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(None)
                })
            }),
        )
        .await
        .unwrap();

    let mut ids = Vec::new();
    for n in 0..12 {
        let job = engine
            .enqueue("bulk", json!({"n": n}), EnqueueOptions::new())
            .await
            .unwrap();
        ids.push(job.id);
    }
    for id in &ids {
        engine.await_terminal(*id, WAIT).await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), ids.len());
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), ids.len());

    let queues = engine.list_queues().await.unwrap();
    let bulk = queues.iter().find(|q| q.name == "bulk").unwrap();
    assert_eq!(bulk.workers, 3);
    assert_eq!(bulk.stats.completed_total, 12);
    assert_eq!(bulk.stats.pending(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn panicking_handler_fails_the_job_and_keeps_the_slot() {
    let engine = common::start_engine().await;
    engine
        .register_handler(
            "fragile",
            1,
            job_handler!(|job| {
                if job.payload["explode"].as_bool().unwrap_or(false) {
                    panic!("kaboom");
                }
                Ok(None)
            }),
        )
        .await
        .unwrap();

    let bad = engine
        .enqueue("fragile", json!({"explode": true}), EnqueueOptions::new())
        .await
        .unwrap();
    let good = engine
        .enqueue("fragile", json!({"explode": false}), EnqueueOptions::new())
        .await
        .unwrap();

    let outcome = engine.await_terminal(bad.id, WAIT).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            error: "handler panicked: kaboom".into()
        }
    );
    assert!(engine.await_terminal(good.id, WAIT).await.unwrap().is_completed());

    engine.shutdown().await;
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let engine = common::start_engine().await;

    let negative = engine
        .enqueue("send_email", json!({}), EnqueueOptions::new().with_delay_ms(-1))
        .await;
    assert!(matches!(negative, Err(QueueError::InvalidArgument(_))));

    let zero_attempts = engine
        .enqueue("send_email", json!({}), EnqueueOptions::new().with_max_attempts(0))
        .await;
    assert!(matches!(zero_attempts, Err(QueueError::InvalidArgument(_))));

    let jobs = engine.list_jobs("send_email", None, 100).await.unwrap();
    assert!(jobs.is_empty());

    let unknown = actors::JobId::new();
    assert_eq!(
        engine.await_terminal(unknown, Duration::from_millis(50)).await,
        Err(QueueError::NotFound(unknown))
    );

    assert!(matches!(
        engine.queue_stats("never_opened").await,
        Err(QueueError::QueueNotFound(_))
    ));

    let no_slots = engine
        .register_handler("send_email", 0, job_handler!(|job| Ok(None)))
        .await;
    assert!(matches!(no_slots, Err(QueueError::InvalidArgument(_))));

    engine
        .register_handler("send_email", 1, job_handler!(|job| Ok(None)))
        .await
        .unwrap();
    let twice = engine
        .register_handler("send_email", 1, job_handler!(|job| Ok(None)))
        .await;
    assert!(matches!(twice, Err(QueueError::InvalidArgument(_))));

    engine.shutdown().await;
}

#[tokio::test]
async fn full_queue_rejects_new_jobs() {
    let engine = common::start_engine().await;
    engine
        .open_queue("tiny", Some(common::fast_queue_config().with_max_queue_size(2)))
        .await
        .unwrap();

    for n in 0..2 {
        engine
            .enqueue("tiny", json!({"n": n}), EnqueueOptions::new())
            .await
            .unwrap();
    }
    let third = engine
        .enqueue("tiny", json!({"n": 2}), EnqueueOptions::new())
        .await;
    assert_eq!(third, Err(QueueError::QueueFull("tiny".into())));

    let waiting = engine
        .list_jobs("tiny", Some(JobState::Waiting), 10)
        .await
        .unwrap();
    assert_eq!(waiting.len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn out_of_range_delay_is_rejected_and_queue_keeps_serving() {
    let engine = common::start_engine().await;
    engine
        .register_handler("send_email", 1, job_handler!(|job| Ok(Some(job.payload))))
        .await
        .unwrap();

    let huge = engine
        .enqueue(
            "send_email",
            json!({"type": "welcome"}),
            EnqueueOptions::new().with_delay_ms(i64::MAX),
        )
        .await;
    assert!(matches!(huge, Err(QueueError::InvalidArgument(_))));

    let job = engine
        .enqueue("send_email", json!({"type": "welcome"}), EnqueueOptions::new())
        .await
        .unwrap();
    assert_eq!(
        engine.await_terminal(job.id, WAIT).await.unwrap(),
        JobOutcome::Completed {
            result: Some(json!({"type": "welcome"}))
        }
    );

    let stats = engine.queue_stats("send_email").await.unwrap();
    assert_eq!(stats.completed_total, 1);
    assert_eq!(stats.pending(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn unusable_configs_are_rejected() {
    let no_ticks = Engine::start(common::fast_config().with_poll_interval(Duration::ZERO)).await;
    assert!(matches!(no_ticks, Err(QueueError::InvalidArgument(_))));

    let bad_lease = Engine::start(
        common::fast_config().with_queue_config(common::fast_queue_config().with_lease_ms(0)),
    )
    .await;
    assert!(matches!(bad_lease, Err(QueueError::InvalidArgument(_))));

    let engine = common::start_engine().await;
    for lease_ms in [0, u64::MAX] {
        let opened = engine
            .open_queue(
                "leases",
                Some(common::fast_queue_config().with_lease_ms(lease_ms)),
            )
            .await;
        assert!(matches!(opened, Err(QueueError::InvalidArgument(_))));
    }
    assert!(matches!(
        engine.queue_stats("leases").await,
        Err(QueueError::QueueNotFound(_))
    ));

    engine.shutdown().await;
}

#[tokio::test]
async fn lifecycle_events_are_broadcast_in_order() {
    let engine = common::start_engine().await;
    let mut events = engine.events();

    engine
        .register_handler("log_activity", 1, job_handler!(|job| Ok(None)))
        .await
        .unwrap();
    let job = engine
        .enqueue("log_activity", json!({"action": "signup"}), EnqueueOptions::new())
        .await
        .unwrap();
    engine.await_terminal(job.id, WAIT).await.unwrap();

    let mut kinds = Vec::new();
    let collected = tokio::time::timeout(WAIT, async {
        while let Ok(event) = events.recv().await {
            if event.job_id() != Some(job.id) {
                continue;
            }
            let done = matches!(event, JobEvent::JobCompleted { .. });
            kinds.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    assert!(collected.is_ok());

    assert!(matches!(kinds[0], JobEvent::JobEnqueued { .. }));
    assert!(matches!(
        kinds[1],
        JobEvent::JobClaimed { attempt: 1, .. }
    ));
    assert!(matches!(kinds[2], JobEvent::JobCompleted { .. }));
    assert!(kinds.iter().all(|e| e.queue() == "log_activity"));

    engine.shutdown().await;
}

#[tokio::test]
async fn dropped_subscriptions_leave_no_waiters() {
    let engine = common::start_engine().await;
    engine.open_queue("idle", None).await.unwrap();

    let job = engine
        .enqueue("idle", json!({}), EnqueueOptions::new())
        .await
        .unwrap();

    {
        let _first = engine.subscribe(job.id);
        let _second = engine.subscribe(job.id);
        assert_eq!(engine.event_bus().subscriber_count(&job.id), 2);
    }
    assert_eq!(engine.event_bus().subscriber_count(&job.id), 0);

    let waiter = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.await_terminal(job.id, WAIT).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.event_bus().subscriber_count(&job.id), 1);

    waiter.abort();
    let _ = waiter.await;
    assert_eq!(engine.event_bus().watched_jobs(), 0);

    engine.shutdown().await;
}
