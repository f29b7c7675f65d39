//! Queue message operations backing [`SqliteQueue`](crate::queue::SqliteQueue).
//!
//! Timestamps in this table are unix milliseconds so visibility timeouts below
//! one second behave as configured.

use crate::error::DatabaseError;
use crate::{Error, Result};
use std::time::Duration;

use super::{Database, QueueMessage};

impl Database {
    /// Append a message to `queue`
    pub async fn enqueue_message(&self, queue: &str, payload: &[u8]) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query(
            "INSERT INTO queue_messages (queue, payload, enqueued_at, deliveries) VALUES (?, ?, ?, 0)",
        )
        .bind(queue)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to enqueue message: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Claim up to `limit` deliverable messages from `queue`, oldest first
    ///
    /// A message is deliverable when it was never claimed or when its last claim
    /// is older than `visibility_timeout`. Claiming is a single statement, so two
    /// consumers never claim the same message within one visibility window.
    pub async fn claim_messages(
        &self,
        queue: &str,
        limit: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let now = chrono::Utc::now().timestamp_millis();
        let cutoff = now - i64::try_from(visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut messages = sqlx::query_as::<_, QueueMessage>(
            r#"
            UPDATE queue_messages
            SET delivered_at = ?, deliveries = deliveries + 1
            WHERE id IN (
                SELECT id FROM queue_messages
                WHERE queue = ? AND (delivered_at IS NULL OR delivered_at <= ?)
                ORDER BY id
                LIMIT ?
            )
            RETURNING id, payload, deliveries
            "#,
        )
        .bind(now)
        .bind(queue)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim messages: {}",
                e
            )))
        })?;

        // RETURNING gives no ordering guarantee
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    /// Acknowledge (delete) a claimed message
    pub async fn ack_message(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM queue_messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to acknowledge message: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Number of messages in `queue` that have not been acknowledged
    pub async fn pending_messages(&self, queue: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count queue messages: {}",
                    e
                )))
            })?;

        Ok(count)
    }
}
