//! Task store seam
//!
//! The requester and the proxy only talk to persistence through [`TaskStore`].
//! [`Database`](crate::db::Database) is the production implementation; tests
//! substitute in-memory fakes that can inject failures.

use crate::Result;
use crate::types::{TaskId, TaskResult, TaskStatus};
use async_trait::async_trait;

/// Durable task records
///
/// Implementations are shared across workers without extra locking, so every
/// method takes `&self`. Status and result writes are idempotent overwrites:
/// replaying them after a redelivery must leave the same record behind.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a `new` record for `id`
    ///
    /// Fails if a record with the same id already exists.
    async fn add_task(&self, id: TaskId) -> Result<()>;

    /// Overwrite the status of `id`, leaving the rest of the record untouched
    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()>;

    /// Overwrite the whole record with a terminal result
    async fn update_task_result(&self, result: &TaskResult) -> Result<()>;

    /// Fetch the current record for `id`
    ///
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) when there is no such record.
    async fn get_task(&self, id: TaskId) -> Result<TaskResult>;

    /// Release the underlying connections
    async fn close(&self) -> Result<()>;
}
