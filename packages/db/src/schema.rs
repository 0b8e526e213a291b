//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(QUEUE_SCHEMA).await?.check()?;
    db.query(JOB_SCHEMA).await?.check()?;
    db.query(JOB_HISTORY_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Queue table schema. Records are keyed by queue name.
const QUEUE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS queue SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS name ON queue TYPE string;
DEFINE FIELD IF NOT EXISTS config_json ON queue TYPE string;
DEFINE FIELD IF NOT EXISTS created_at_ms ON queue TYPE int;
DEFINE FIELD IF NOT EXISTS updated_at_ms ON queue TYPE int;

DEFINE INDEX IF NOT EXISTS queue_name ON queue FIELDS name UNIQUE;
"#;

/// Job table schema. Records are keyed by job ID.
///
/// Payload and result are stored as JSON text and timestamps as epoch
/// milliseconds so ordering by time is a plain integer sort.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS queue ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string;
DEFINE FIELD IF NOT EXISTS payload ON job TYPE string;
DEFINE FIELD IF NOT EXISTS attempts ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS max_attempts ON job TYPE int DEFAULT 1;
DEFINE FIELD IF NOT EXISTS last_error ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS result ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at_ms ON job TYPE int;
DEFINE FIELD IF NOT EXISTS ready_at_ms ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS updated_at_ms ON job TYPE int;

-- Per-queue state scans (restore, counts)
DEFINE INDEX IF NOT EXISTS job_queue_state ON job FIELDS queue, state;
-- Delayed index
DEFINE INDEX IF NOT EXISTS job_ready ON job FIELDS ready_at_ms;
DEFINE INDEX IF NOT EXISTS job_updated ON job FIELDS updated_at_ms;
"#;

/// Job history table schema for archived terminal jobs.
const JOB_HISTORY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_history SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON job_history TYPE string;
DEFINE FIELD IF NOT EXISTS queue ON job_history TYPE string;
DEFINE FIELD IF NOT EXISTS final_state ON job_history TYPE string;
DEFINE FIELD IF NOT EXISTS attempts ON job_history TYPE int DEFAULT 1;
DEFINE FIELD IF NOT EXISTS error ON job_history TYPE option<string>;
DEFINE FIELD IF NOT EXISTS result ON job_history TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at_ms ON job_history TYPE int;
DEFINE FIELD IF NOT EXISTS finished_at_ms ON job_history TYPE int;
DEFINE FIELD IF NOT EXISTS archived_at_ms ON job_history TYPE int;

DEFINE INDEX IF NOT EXISTS history_queue ON job_history FIELDS queue;
DEFINE INDEX IF NOT EXISTS history_state ON job_history FIELDS final_state;
DEFINE INDEX IF NOT EXISTS history_archived ON job_history FIELDS archived_at_ms;
"#;
