//! Job handler trait and function-based handlers.

use queue_core::Job;
use std::future::Future;
use std::pin::Pin;

/// Result type for job handlers.
///
/// `Ok` carries the optional result stored on the completed job; `Err`
/// carries the message recorded as the job's last error.
pub type HandlerResult = Result<Option<serde_json::Value>, String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// A handler is attached to one queue through `Engine::register_handler` and
/// runs every job claimed from it. Handlers may run more than once for the
/// same job (retries, expired leases), so they should be idempotent.
pub trait JobHandler: Send + Sync + 'static {
    /// Process a job and return the result.
    fn handle(&self, job: &Job) -> HandlerFuture;
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Helper macro for creating job handlers from async closures.
///
/// ```ignore
/// let handler = job_handler!(|job| {
///     tracing::info!("payload: {}", job.payload);
///     Ok(None)
/// });
/// ```
#[macro_export]
macro_rules! job_handler {
    (|$job:ident| $body:expr) => {
        $crate::FnHandler::new(|$job: &$crate::Job| {
            let $job = $job.clone();
            ::std::boxed::Box::pin(async move {
                let result: $crate::HandlerResult = $body;
                result
            }) as $crate::HandlerFuture
        })
    };
}
