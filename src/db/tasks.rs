//! Task record CRUD operations.

use crate::error::DatabaseError;
use crate::store::TaskStore;
use crate::types::{TaskId, TaskResult, TaskStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;

use super::{Database, TaskRow};

impl Database {
    /// Insert a new task record with status `new`
    pub async fn insert_task(&self, id: TaskId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO tasks (id, status, headers, body, content_length, created_at, updated_at)
            VALUES (?, ?, '{}', X'', 0, ?, ?)
            "#,
        )
        .bind(id)
        .bind(TaskStatus::New.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::Database(
                DatabaseError::ConstraintViolation(format!("task {} already exists", id)),
            ),
            other => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task: {}",
                other
            ))),
        })?;

        Ok(())
    }

    /// Set the status of a task
    ///
    /// Returns whether a record was changed; unknown ids are not an error.
    pub async fn set_task_status(&self, id: TaskId, status: TaskStatus) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update task status: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite a task record with a result
    ///
    /// Returns whether a record was changed; unknown ids are not an error.
    pub async fn set_task_result(&self, result: &TaskResult) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let headers = serde_json::to_string(&result.headers)?;

        let outcome = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, status_code = ?, headers = ?, body = ?, content_length = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(result.status.as_str())
        .bind(result.status_code.map(i64::from))
        .bind(headers)
        .bind(result.body.as_slice())
        .bind(i64::try_from(result.content_length).unwrap_or(i64::MAX))
        .bind(now)
        .bind(result.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update task result: {}",
                e
            )))
        })?;

        Ok(outcome.rows_affected() > 0)
    }

    /// Get a task record by ID
    pub async fn find_task(&self, id: TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, status, status_code, headers, body, content_length, created_at, updated_at
            FROM tasks
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Count task records per status
    ///
    /// Statuses without records are included with a count of zero.
    pub async fn count_by_status(&self) -> Result<HashMap<TaskStatus, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count tasks: {}",
                        e
                    )))
                })?;

        let mut counts: HashMap<TaskStatus, i64> = [
            TaskStatus::New,
            TaskStatus::InProcess,
            TaskStatus::Done,
            TaskStatus::Error,
        ]
        .into_iter()
        .map(|s| (s, 0))
        .collect();

        for (status, count) in rows {
            match TaskStatus::parse(&status) {
                Some(status) => {
                    counts.insert(status, count);
                }
                None => tracing::warn!(status = %status, count, "Ignoring tasks with unknown status"),
            }
        }

        Ok(counts)
    }
}

#[async_trait]
impl TaskStore for Database {
    async fn add_task(&self, id: TaskId) -> Result<()> {
        self.insert_task(id).await
    }

    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        if !self.set_task_status(id, status).await? {
            tracing::warn!(task_id = %id, status = %status, "Status update matched no task record");
        }
        Ok(())
    }

    async fn update_task_result(&self, result: &TaskResult) -> Result<()> {
        if !self.set_task_result(result).await? {
            tracing::warn!(task_id = %result.id, "Result update matched no task record");
        }
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<TaskResult> {
        match self.find_task(id).await? {
            Some(row) => row.try_into(),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    async fn close(&self) -> Result<()> {
        Database::close(self).await;
        Ok(())
    }
}
