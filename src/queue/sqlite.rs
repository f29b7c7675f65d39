//! Durable queue on the `queue_messages` table.

use super::{Subscription, TaskReceiver, TaskSender, decode_task, forward};
use crate::config::Config;
use crate::db::Database;
use crate::types::Task;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Polling consumer and publisher over the SQLite database
///
/// Consumption is at-least-once: messages are claimed in batches of
/// `prefetch`, acknowledged once handed to the consumer, and become visible
/// again if a claim is not acknowledged within `visibility_timeout`.
#[derive(Clone, Debug)]
pub struct SqliteQueue {
    db: Database,
    name: String,
    poll_interval: Duration,
    prefetch: usize,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    /// Create a queue handle over an open database
    pub fn new(
        db: Database,
        name: impl Into<String>,
        poll_interval: Duration,
        prefetch: usize,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            db,
            name: name.into(),
            poll_interval,
            prefetch: prefetch.max(1),
            visibility_timeout,
        }
    }

    /// Open the configured queue database and build a handle
    pub async fn open(config: &Config) -> Result<Self> {
        let db = Database::new(&config.queue.database_path).await?;
        Ok(Self::new(
            db,
            config.queue.name.clone(),
            config.queue.poll_interval,
            config.prefetch(),
            config.queue.visibility_timeout,
        ))
    }

    /// Name of the queue this handle publishes to and consumes from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages published but not yet acknowledged
    pub async fn pending(&self) -> Result<i64> {
        self.db.pending_messages(&self.name).await
    }

    async fn run(self, out: mpsc::Sender<Task>, cancel: CancellationToken) {
        tracing::info!(queue = %self.name, prefetch = self.prefetch, "Queue subscription started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let batch = match self
                .db
                .claim_messages(&self.name, self.prefetch, self.visibility_timeout)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(queue = %self.name, error = %e, "Failed to poll queue");
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                }
            }

            for message in batch {
                let Some(task) = decode_task(&message.payload) else {
                    // Redelivering a malformed payload would fail the same way
                    self.ack(message.id).await;
                    continue;
                };

                tracing::debug!(
                    task_id = %task.id,
                    message_id = message.id,
                    deliveries = message.deliveries,
                    "Queue message received"
                );

                // Claimed messages left unsent here are redelivered after the visibility timeout
                if !forward(&out, task, &cancel).await {
                    tracing::info!(queue = %self.name, "Queue subscription stopped");
                    return;
                }
                self.ack(message.id).await;
            }
        }

        tracing::info!(queue = %self.name, "Queue subscription stopped");
    }

    async fn ack(&self, id: i64) {
        if let Err(e) = self.db.ack_message(id).await {
            tracing::warn!(message_id = id, error = %e, "Failed to acknowledge queue message");
        }
    }
}

#[async_trait]
impl TaskSender for SqliteQueue {
    async fn send_task(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_vec(task)?;
        self.db
            .enqueue_message(&self.name, &payload)
            .await
            .map_err(|e| Error::Queue(format!("failed to publish task {}: {}", task.id, e)))?;
        tracing::debug!(task_id = %task.id, queue = %self.name, "Task published");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.db.close().await;
        Ok(())
    }
}

#[async_trait]
impl TaskReceiver for SqliteQueue {
    async fn subscribe(&self, out: mpsc::Sender<Task>) -> Result<Subscription> {
        // Registration: make sure the queue table is reachable before spawning the loop
        self.pending()
            .await
            .map_err(|e| Error::Queue(format!("failed to subscribe to '{}': {}", self.name, e)))?;

        let queue = self.clone();
        Ok(Subscription::spawn(move |cancel| queue.run(out, cancel)))
    }

    async fn close(&self) -> Result<()> {
        self.db.close().await;
        Ok(())
    }
}
