//! Submission side of the pipeline
//!
//! [`ProxyService`] validates inbound tasks, persists a `new` record and
//! publishes the task to the queue. It also answers result lookups.

use crate::queue::TaskSender;
use crate::store::TaskStore;
use crate::types::{Method, NewTask, Task, TaskId, TaskResult};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Per-request correlation data carried through the submission path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    /// Request identifier echoed in the `x-request-id` response header
    pub request_id: Uuid,
}

impl RequestContext {
    /// Context with a fresh request id
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts tasks and serves their results
pub struct ProxyService {
    store: Arc<dyn TaskStore>,
    sender: Arc<dyn TaskSender>,
}

impl ProxyService {
    /// Create a service over a store and a queue publisher
    pub fn new(store: Arc<dyn TaskStore>, sender: Arc<dyn TaskSender>) -> Self {
        Self { store, sender }
    }

    /// Validate, persist and publish a task
    ///
    /// The record is written before the message is published, so the
    /// requester always finds a record for every delivery. If publishing
    /// fails the record stays `new` and the error is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a bad URL, method or header
    /// - store or queue errors otherwise
    pub async fn add_task(&self, ctx: &RequestContext, new_task: NewTask) -> Result<TaskId> {
        let span = tracing::info_span!("add_task", request_id = %ctx.request_id);

        async move {
            let task = validate(new_task)?;
            let id = task.id;

            self.store.add_task(id).await.inspect_err(|e| {
                tracing::error!(task_id = %id, error = %e, "Failed to persist task");
            })?;

            self.sender.send_task(&task).await.inspect_err(|e| {
                tracing::error!(task_id = %id, error = %e, "Failed to publish task");
            })?;

            tracing::info!(task_id = %id, method = %task.method, url = %task.url, "Task accepted");
            Ok(id)
        }
        .instrument(span)
        .await
    }

    /// Fetch the current record of a task
    pub async fn get_task_info(&self, ctx: &RequestContext, id: TaskId) -> Result<TaskResult> {
        let span = tracing::info_span!("get_task_info", request_id = %ctx.request_id, task_id = %id);
        self.store.get_task(id).instrument(span).await
    }

    /// Close the store and the queue publisher
    ///
    /// Both are attempted; failures are returned together as [`Error::Close`].
    pub async fn close(&self) -> Result<()> {
        let (store_result, sender_result) =
            futures::join!(self.store.close(), self.sender.close());

        let errors: Vec<Error> = [store_result, sender_result]
            .into_iter()
            .filter_map(|r| r.err())
            .collect();

        if errors.is_empty() {
            tracing::info!("Proxy shutdown complete");
            Ok(())
        } else {
            for e in &errors {
                tracing::error!(error = %e, "Failed to release resource during shutdown");
            }
            Err(Error::Close(errors))
        }
    }
}

/// Turn a submission into a task with a fresh id
fn validate(new_task: NewTask) -> Result<Task> {
    let url = url::Url::parse(new_task.url.trim())
        .map_err(|e| Error::Validation(format!("invalid url '{}': {}", new_task.url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "unsupported url scheme '{}', expected http or https",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::Validation(format!("url '{}' has no host", new_task.url)));
    }

    let method: Method = new_task.method.parse().map_err(Error::Validation)?;

    let headers = new_task.headers.unwrap_or_default();
    headers
        .to_header_map()
        .map_err(|e| Error::Validation(format!("invalid header: {e}")))?;

    Ok(Task {
        id: TaskId::new(),
        url: url.to_string(),
        method,
        headers,
        body: new_task.body.unwrap_or_default(),
    })
}
