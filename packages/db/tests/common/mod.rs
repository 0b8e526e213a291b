use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard};

use db::{DbConfig, DbError};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

// The in-memory engine runs its router on the runtime that opened it, so
// every test shares one runtime instead of one per #[tokio::test].
static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("test runtime should build")
});

pub fn block_on<F: Future>(future: F) -> F::Output {
    RUNTIME.block_on(future)
}

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    db::init(DbConfig::memory()).await?;
    reset_db().await?;
    Ok(guard)
}

pub async fn reset_db() -> Result<(), DbError> {
    let db_conn = db::get_db()?;
    db_conn
        .query("DELETE job_history; DELETE job; DELETE queue;")
        .await?;
    Ok(())
}
