//! In-process queue for single-binary deployments and tests.

use super::{Subscription, TaskReceiver, TaskSender, decode_task, forward};
use crate::types::Task;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Unbounded in-memory queue carrying the same JSON payloads as the durable one
///
/// There is a single consumer: the receiving half is handed to the first
/// subscription and returned when that subscription exits, so a later
/// subscription resumes where the previous one stopped.
#[derive(Debug)]
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: std::sync::Arc<Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>>,
    closed: CancellationToken,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: std::sync::Arc::new(Mutex::new(Some(rx))),
            closed: CancellationToken::new(),
        }
    }

    /// Publish an arbitrary payload, bypassing task serialization
    pub fn publish_raw(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Queue("memory queue is closed".into()));
        }
        self.tx
            .send(payload.into())
            .map_err(|_| Error::Queue("memory queue is closed".into()))
    }
}

#[async_trait]
impl TaskSender for MemoryQueue {
    async fn send_task(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_vec(task)?;
        self.publish_raw(payload)?;
        tracing::debug!(task_id = %task.id, "Task published");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

#[async_trait]
impl TaskReceiver for MemoryQueue {
    async fn subscribe(&self, out: mpsc::Sender<Task>) -> Result<Subscription> {
        if self.closed.is_cancelled() {
            return Err(Error::Queue("memory queue is closed".into()));
        }
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Queue("memory queue already has a subscriber".into()))?;

        let slot = self.rx.clone();
        let closed = self.closed.clone();

        Ok(Subscription::spawn(move |cancel| async move {
            loop {
                let payload = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = closed.cancelled() => break,
                    payload = rx.recv() => match payload {
                        Some(payload) => payload,
                        None => break,
                    },
                };

                let Some(task) = decode_task(&payload) else {
                    continue;
                };
                if !forward(&out, task, &cancel).await {
                    break;
                }
            }

            *slot.lock().await = Some(rx);
            tracing::debug!("Memory queue subscription stopped");
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}
