//! Demo caller: registers a user, waits for activation, then logs in.
//!
//! Mirrors a small sign-up service: registration fans out to three queues
//! (welcome email, delayed activation, activity log) and login waits up to
//! one second for its activity record before answering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use actors::{Engine, EngineConfig, EnqueueOptions, FnHandler, JobEvent, JobOutcome, QueueError};
use chrono::{DateTime, Utc};
use serde_json::json;

const SEND_EMAIL: &str = "send_email";
const ACTIVATE_USER: &str = "activate_user";
const LOG_ACTIVITY: &str = "log_activity";

#[derive(Debug, Clone)]
struct User {
    id: String,
    email: String,
    active: bool,
}

#[derive(Debug, Clone)]
struct Activity {
    user_id: String,
    activity: String,
    timestamp: DateTime<Utc>,
}

/// In-memory users and activity records shared with the handlers.
#[derive(Default)]
struct Directory {
    users: Mutex<HashMap<String, User>>,
    activities: Mutex<Vec<Activity>>,
}

impl Directory {
    fn users(&self) -> std::sync::MutexGuard<'_, HashMap<String, User>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn activities(&self) -> std::sync::MutexGuard<'_, Vec<Activity>> {
        self.activities.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_by_email(&self, email: &str) -> Option<User> {
        self.users().values().find(|u| u.email == email).cloned()
    }
}

async fn register_handlers(engine: &Engine, directory: &Arc<Directory>) -> Result<(), QueueError> {
    engine
        .register_handler(
            SEND_EMAIL,
            2,
            FnHandler::new(|job| {
                let email = job.payload["email"].as_str().unwrap_or_default().to_string();
                let user_id = job.payload["userId"].as_str().unwrap_or_default().to_string();
                Box::pin(async move {
                    tracing::info!("Sending welcome email to {} (User ID: {})", email, user_id);
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    tracing::info!("Email sent to {}", email);
                    Ok(None)
                })
            }),
        )
        .await?;

    let users = Arc::clone(directory);
    engine
        .register_handler(
            ACTIVATE_USER,
            1,
            FnHandler::new(move |job| {
                let users = Arc::clone(&users);
                let user_id = job.payload["userId"].as_str().unwrap_or_default().to_string();
                Box::pin(async move {
                    if !users.users().contains_key(&user_id) {
                        return Err(format!("User with ID {} not found.", user_id));
                    }
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    let mut all = users.users();
                    let Some(user) = all.get_mut(&user_id) else {
                        return Err(format!("User with ID {} not found.", user_id));
                    };
                    user.active = true;
                    tracing::info!("User {} activated.", user.email);
                    Ok(None)
                })
            }),
        )
        .await?;

    let activities = Arc::clone(directory);
    engine
        .register_handler(
            LOG_ACTIVITY,
            1,
            FnHandler::new(move |job| {
                let activities = Arc::clone(&activities);
                let user_id = job.payload["userId"].as_str().unwrap_or_default().to_string();
                let activity = job.payload["activityType"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                Box::pin(async move {
                    tracing::info!("Activity logged for User ID {}: {}", user_id, activity);
                    activities.activities().push(Activity {
                        user_id,
                        activity,
                        timestamp: Utc::now(),
                    });
                    Ok(None)
                })
            }),
        )
        .await?;

    Ok(())
}

/// Log every terminal failure, like per-worker `failed` listeners would.
fn spawn_failure_logger(engine: &Engine) {
    let mut events = engine.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let JobEvent::JobFailed {
                job_id,
                queue,
                error,
                will_retry: false,
                ..
            } = event
            {
                tracing::error!("Worker for '{}' failed job {}: {}", queue, job_id, error);
            }
        }
    });
}

async fn register(engine: &Engine, directory: &Directory, email: &str) -> Result<User, QueueError> {
    if directory.find_by_email(email).is_some() {
        return Err(QueueError::InvalidArgument("User already exists.".into()));
    }

    let user = User {
        id: ulid::Ulid::new().to_string(),
        email: email.to_string(),
        active: false,
    };
    directory.users().insert(user.id.clone(), user.clone());
    tracing::info!("User registered: {} (ID: {})", user.email, user.id);

    engine
        .enqueue(
            SEND_EMAIL,
            json!({"type": "welcome", "userId": user.id, "email": user.email}),
            EnqueueOptions::new(),
        )
        .await?;
    engine
        .enqueue(
            ACTIVATE_USER,
            json!({"userId": user.id}),
            EnqueueOptions::new().with_delay_ms(1000),
        )
        .await?;
    engine
        .enqueue(
            LOG_ACTIVITY,
            json!({"userId": user.id, "activityType": "User Registered"}),
            EnqueueOptions::new(),
        )
        .await?;

    Ok(user)
}

async fn login(
    engine: &Engine,
    directory: &Directory,
    email: &str,
) -> Result<(User, Vec<Activity>), QueueError> {
    let user = directory
        .find_by_email(email)
        .ok_or_else(|| QueueError::InvalidArgument("User not found.".into()))?;
    if !user.active {
        return Err(QueueError::InvalidArgument("User is not activated.".into()));
    }

    let job = engine
        .enqueue(
            LOG_ACTIVITY,
            json!({"userId": user.id, "activityType": "User Logged In"}),
            EnqueueOptions::new(),
        )
        .await?;
    if let JobOutcome::Failed { error } = engine
        .await_terminal(job.id, Duration::from_millis(1000))
        .await?
    {
        return Err(QueueError::Handler(error));
    }

    let activities = directory
        .activities()
        .iter()
        .filter(|a| a.user_id == user.id)
        .cloned()
        .collect();
    Ok((user, activities))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let engine = Engine::start(EngineConfig::from_env()?).await?;
    let directory = Arc::new(Directory::default());

    register_handlers(&engine, &directory).await?;
    spawn_failure_logger(&engine);

    let user = register(&engine, &directory, "ada@example.com").await?;

    match login(&engine, &directory, &user.email).await {
        Err(e) => tracing::info!("Login before activation rejected: {}", e),
        Ok(_) => tracing::warn!("Login succeeded before activation"),
    }

    // Activation is delayed by one second and takes another to run.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let (user, activities) = login(&engine, &directory, &user.email).await?;
    tracing::info!("Login successful: {} (active: {})", user.email, user.active);
    for activity in &activities {
        tracing::info!("  {} at {}", activity.activity, activity.timestamp);
    }

    engine
        .enqueue(ACTIVATE_USER, json!({"userId": "nobody"}), EnqueueOptions::new())
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    for queue in engine.list_queues().await? {
        tracing::info!(
            "Queue '{}': {} worker(s), {} completed, {} failed, {} pending",
            queue.name,
            queue.workers,
            queue.stats.completed_total,
            queue.stats.failed_total,
            queue.stats.pending()
        );
    }

    engine.shutdown().await;
    Ok(())
}
