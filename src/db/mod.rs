//! Database layer for task-relay
//!
//! Handles SQLite persistence for task records and the durable task queue.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`tasks`] - Task record CRUD (the [`TaskStore`](crate::store::TaskStore) implementation)
//! - [`queue`] - Queue message publish, claim and acknowledge

use crate::error::DatabaseError;
use crate::types::{Headers, TaskId, TaskResult, TaskStatus};
use crate::{Error, Result};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod queue;
mod tasks;

/// Task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Task identifier
    pub id: TaskId,
    /// Status string (see [`TaskStatus::as_str`])
    pub status: String,
    /// HTTP status code of the response, if any
    pub status_code: Option<i64>,
    /// Response headers as a JSON object
    pub headers: String,
    /// Response body bytes
    pub body: Vec<u8>,
    /// Bytes read from the response body
    pub content_length: i64,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl TryFrom<TaskRow> for TaskResult {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status = TaskStatus::parse(&row.status).ok_or_else(|| {
            Error::Database(DatabaseError::CorruptRecord(format!(
                "task {} has unknown status '{}'",
                row.id, row.status
            )))
        })?;
        let headers: Headers = serde_json::from_str(&row.headers).map_err(|e| {
            Error::Database(DatabaseError::CorruptRecord(format!(
                "task {} has malformed headers: {}",
                row.id, e
            )))
        })?;

        Ok(TaskResult {
            id: row.id,
            status,
            status_code: row.status_code.and_then(|c| u16::try_from(c).ok()),
            headers,
            body: row.body,
            content_length: row.content_length.max(0) as u64,
        })
    }
}

/// Queue message claimed for delivery
#[derive(Debug, Clone, FromRow)]
pub struct QueueMessage {
    /// Row identifier, used to acknowledge the message
    pub id: i64,
    /// Raw message payload (JSON-encoded task)
    pub payload: Vec<u8>,
    /// How many times the message has been claimed, including this claim
    pub deliveries: i64,
}

/// Database handle for task-relay
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}
