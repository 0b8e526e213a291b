//! Queue repository for CRUD operations.

use chrono::{DateTime, Utc};
use queue_core::QueueConfig;
use serde::{Deserialize, Serialize};

use crate::{DbError, get_db};

/// Repository for queue persistence operations.
pub struct QueueRepository;

/// Stored shape of a queue record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueRow {
    name: String,
    config_json: String,
    created_at_ms: i64,
    updated_at_ms: i64,
}

/// A queue as loaded from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredQueue {
    pub name: String,
    pub config: QueueConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<QueueRow> for StoredQueue {
    type Error = DbError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let config = serde_json::from_str(&row.config_json)?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(row.created_at_ms)
            .ok_or_else(|| DbError::Serialization("Invalid created_at".into()))?;
        let updated_at = DateTime::<Utc>::from_timestamp_millis(row.updated_at_ms)
            .ok_or_else(|| DbError::Serialization("Invalid updated_at".into()))?;

        Ok(StoredQueue {
            name: row.name,
            config,
            created_at,
            updated_at,
        })
    }
}

impl QueueRepository {
    /// Create the queue record, or replace the configuration of an existing one.
    pub async fn save(name: &str, config: &QueueConfig) -> Result<StoredQueue, DbError> {
        let db = get_db()?;
        let now = Utc::now().timestamp_millis();

        let existing: Option<QueueRow> = db.select(("queue", name.to_string())).await?;

        let row = QueueRow {
            name: name.to_string(),
            config_json: serde_json::to_string(config)?,
            created_at_ms: existing.as_ref().map_or(now, |r| r.created_at_ms),
            updated_at_ms: now,
        };

        let record: Option<QueueRow> = if existing.is_some() {
            db.update(("queue", name.to_string())).content(row).await?
        } else {
            db.create(("queue", name.to_string())).content(row).await?
        };

        record
            .ok_or_else(|| DbError::Query(format!("Failed to save queue: {}", name)))
            .and_then(StoredQueue::try_from)
    }

    /// Get a queue by name.
    pub async fn get(name: &str) -> Result<StoredQueue, DbError> {
        let db = get_db()?;

        let record: Option<QueueRow> = db.select(("queue", name.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Queue not found: {}", name)))
            .and_then(StoredQueue::try_from)
    }

    /// Check if a queue exists.
    pub async fn exists(name: &str) -> Result<bool, DbError> {
        let db = get_db()?;

        let record: Option<QueueRow> = db.select(("queue", name.to_string())).await?;

        Ok(record.is_some())
    }
}
