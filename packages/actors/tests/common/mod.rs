#![allow(dead_code)]

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::Runtime;

use actors::{Engine, EngineConfig, QueueConfig};

/// Tick and idle backoff short enough to keep the suites fast.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub fn fast_queue_config() -> QueueConfig {
    QueueConfig::default().with_idle_backoff_ms(5, 20)
}

pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_poll_interval(POLL_INTERVAL)
        .with_queue_config(fast_queue_config())
}

pub async fn start_engine() -> Engine {
    Engine::start(fast_config())
        .await
        .expect("engine should start")
}

// The in-memory store runs its router on the runtime that opened it, so
// suites touching the store share one runtime instead of one per test.
static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("test runtime should build")
});

pub fn block_on<F: Future>(future: F) -> F::Output {
    RUNTIME.block_on(future)
}
