//! Queue transport between the proxy and the requester
//!
//! The proxy publishes JSON-encoded [`Task`]s through a [`TaskSender`]; the
//! requester consumes them through a [`TaskReceiver`], which bridges deliveries
//! onto an in-process bounded channel for as long as its [`Subscription`] lives.
//!
//! Two backends are provided:
//! - [`SqliteQueue`] - durable queue on the shared SQLite database
//! - [`MemoryQueue`] - in-process queue for single-binary deployments and tests

use crate::Result;
use crate::types::Task;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

/// Publishing side of the queue
#[async_trait]
pub trait TaskSender: Send + Sync {
    /// Publish one task message
    async fn send_task(&self, task: &Task) -> Result<()>;

    /// Release the underlying transport
    async fn close(&self) -> Result<()>;
}

/// Consuming side of the queue
#[async_trait]
pub trait TaskReceiver: Send + Sync {
    /// Start forwarding decoded tasks to `out`
    ///
    /// Fails only when the initial registration with the transport fails.
    /// Malformed deliveries are logged and dropped, never forwarded. The
    /// subscription task owns `out`: the channel closes exactly once, when
    /// the subscription loop exits after [`Subscription::cancel`].
    async fn subscribe(&self, out: mpsc::Sender<Task>) -> Result<Subscription>;

    /// Release the underlying transport
    async fn close(&self) -> Result<()>;
}

/// Handle to a running subscription loop
///
/// Dropping the handle cancels the loop without waiting for it.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Spawn a subscription loop
    ///
    /// The loop receives the token it must watch; it should return promptly
    /// once the token is cancelled and never send after observing it.
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop delivering new tasks
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait until the loop has exited and closed its channel
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Subscription loop terminated abnormally");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Decode a delivery body, logging and discarding malformed payloads
pub(crate) fn decode_task(payload: &[u8]) -> Option<Task> {
    match serde_json::from_slice::<Task>(payload) {
        Ok(task) => Some(task),
        Err(e) => {
            tracing::error!(
                error = %e,
                payload = %String::from_utf8_lossy(payload),
                "Dropping malformed queue message"
            );
            None
        }
    }
}

/// Hand a task to the consumer unless the subscription is cancelled first
///
/// Returns `false` when the loop should exit: either cancellation won the race
/// or the consumer dropped its receiver.
pub(crate) async fn forward(
    out: &mpsc::Sender<Task>,
    task: Task,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = out.send(task) => sent.is_ok(),
    }
}
