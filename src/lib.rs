//! # task-relay
//!
//! Asynchronous HTTP-proxying task pipeline.
//!
//! A client submits a description of an HTTP request to the proxy. The proxy
//! persists a `new` record, publishes the task to a durable queue and returns
//! the task id. A separate requester process consumes the queue, executes the
//! request with bounded concurrency and a fixed retry budget, and writes the
//! response back to the store where the client can poll for it.
//!
//! ## Components
//!
//! - [`submitter::ProxyService`] - validation, persistence and publishing
//! - [`queue`] - [`TaskSender`](queue::TaskSender) / [`TaskReceiver`](queue::TaskReceiver)
//!   seams with SQLite and in-memory backends
//! - [`requester::RequesterService`] - subscription loop feeding a bounded
//!   [`WorkerPool`](requester::WorkerPool) that drives each task through
//!   `new → in_process → {done | error}`
//! - [`store::TaskStore`] - persistence seam, implemented by [`db::Database`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use task_relay::{Config, RequesterApp, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let app = Arc::new(RequesterApp::new(config).await?);
//!
//!     let mut events = app.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     run_with_shutdown(app).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// HTTP surfaces (task API, monitoring API)
pub mod api;
/// Process wiring
pub mod app;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Log subscriber setup
pub mod logging;
/// Requester counters and histograms
pub mod metrics;
/// Queue transport
pub mod queue;
/// Task consumer
pub mod requester;
/// Fixed-budget retry helper
pub mod retry;
/// Task store seam
pub mod store;
/// Task submission
pub mod submitter;
/// Core types and events
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use app::{Lifecycle, ProxyApp, RequesterApp};
pub use config::{Config, ConfigArgs};
pub use db::Database;
pub use error::{ApiError, DatabaseError, DispatchError, Error, ErrorDetail, Result, ToHttpStatus};
pub use requester::{RequesterService, TaskExecutor, TaskOutcome, WorkerPool};
pub use submitter::{ProxyService, RequestContext};
pub use types::{Event, Headers, Method, NewTask, Task, TaskId, TaskResult, TaskStatus};

use std::sync::Arc;
use std::time::Duration;

/// Time allowed for a graceful shutdown once a signal arrives
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run an app until a termination signal, then shut it down
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Shutdown is bounded by [`SHUTDOWN_TIMEOUT`]. If the app stops on its own
/// first, it is still shut down so its resources are released.
pub async fn run_with_shutdown<A>(app: Arc<A>) -> Result<()>
where
    A: Lifecycle + 'static,
{
    let mut runner = tokio::spawn({
        let app = app.clone();
        async move { app.run().await }
    });

    tokio::select! {
        _ = wait_for_signal() => {}
        result = &mut runner => {
            tracing::warn!("App stopped without a shutdown signal");
            let shutdown = app.shutdown().await;
            join_result(result)?;
            return shutdown;
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app.shutdown()).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::error!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Timeout waiting for graceful shutdown"
            );
            runner.abort();
            return Err(Error::ShuttingDown);
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut runner).await {
        Ok(result) => join_result(result),
        Err(_) => {
            tracing::warn!("App did not stop after shutdown, aborting");
            runner.abort();
            Ok(())
        }
    }
}

fn join_result(result: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    result.map_err(|e| Error::Other(format!("app task failed: {}", e)))?
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
