//! Repository for queued message database operations.
//!
//! Owns the selection predicate and the atomic claim. Claiming runs in one
//! transaction: candidate ids are selected under `FOR UPDATE SKIP LOCKED`,
//! then marked by identifier set — never by re-evaluating the predicate —
//! so two concurrent claimants cannot mark the same row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{join_addresses, MessageId, NewMessage, QueuedMessage},
};

/// Repository for queued message database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new message and returns the stored record.
    ///
    /// The identifier and both timestamps are assigned here; the returned
    /// record reflects exactly what was persisted.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or constraints are violated.
    pub async fn insert(&self, message: &NewMessage, now: DateTime<Utc>) -> Result<QueuedMessage> {
        let stored = sqlx::query_as::<_, QueuedMessage>(
            r#"
            INSERT INTO mail_queue (
                id, subject, body, from_addrs, to_addrs, cc_addrs, bcc_addrs,
                content_type, charset, metadata, priority, attempts, max_attempts,
                locked, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $12, FALSE, $13, $13
            )
            RETURNING id, subject, body, from_addrs, to_addrs, cc_addrs, bcc_addrs,
                      content_type, charset, metadata, priority, attempts, max_attempts,
                      locked, created_at, updated_at
            "#,
        )
        .bind(MessageId::new())
        .bind(&message.payload.subject)
        .bind(&message.payload.body)
        .bind(join_addresses(&message.payload.from))
        .bind(join_addresses(&message.payload.to))
        .bind(join_addresses(&message.payload.cc))
        .bind(join_addresses(&message.payload.bcc))
        .bind(message.payload.format.as_mime())
        .bind(message.payload.charset.as_label())
        .bind(&message.payload.metadata)
        .bind(message.priority)
        .bind(message.max_attempts)
        .bind(now)
        .fetch_one(&*self.pool)
        .await?;

        Ok(stored)
    }

    /// Selects and claims due messages in one atomic step.
    ///
    /// A message qualifies when its attempt budget is unspent and it is
    /// either unlocked or its lock has gone stale (`updated_at` older than
    /// `stale_before`). Candidates are ordered by priority, oldest first
    /// within a priority, and bounded by `limit`. Selected rows are marked
    /// locked with a refreshed `updated_at` inside the same transaction.
    ///
    /// An empty qualifying set issues no update at all.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails; no rows are left
    /// half-claimed in that case.
    pub async fn claim_due(
        &self,
        limit: i64,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedMessage>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM mail_queue
            WHERE attempts < max_attempts
              AND (locked = FALSE OR updated_at < $1)
            ORDER BY priority ASC, created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let mut messages = sqlx::query_as::<_, QueuedMessage>(
            r#"
            UPDATE mail_queue
            SET locked = TRUE, updated_at = $2
            WHERE id = ANY($1)
            RETURNING id, subject, body, from_addrs, to_addrs, cc_addrs, bcc_addrs,
                      content_type, charset, metadata, priority, attempts, max_attempts,
                      locked, created_at, updated_at
            "#,
        )
        .bind(&ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // UPDATE .. RETURNING does not preserve the selection order.
        messages.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| a.created_at.cmp(&b.created_at))
        });

        Ok(messages)
    }

    /// Deletes a message after confirmed successful delivery.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn remove(&self, id: MessageId) -> Result<()> {
        sqlx::query("DELETE FROM mail_queue WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Releases a message for retry after a failed delivery attempt.
    ///
    /// Stores the incremented attempt count computed from the claimed record
    /// and clears the lock; the write is keyed by identifier only. The
    /// message becomes eligible for re-selection immediately.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn release_for_retry(
        &self,
        id: MessageId,
        attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mail_queue
            SET locked = FALSE, attempts = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds a message by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: MessageId) -> Result<Option<QueuedMessage>> {
        let message = sqlx::query_as::<_, QueuedMessage>(
            r#"
            SELECT id, subject, body, from_addrs, to_addrs, cc_addrs, bcc_addrs,
                   content_type, charset, metadata, priority, attempts, max_attempts,
                   locked, created_at, updated_at
            FROM mail_queue
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(message)
    }

    /// Counts all queued messages.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM mail_queue").fetch_one(&*self.pool).await?;

        Ok(count.0)
    }

    /// Counts messages whose attempt budget is spent.
    ///
    /// Exhausted messages are retained silently and never re-selected; this
    /// is the operator's window into them.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_exhausted(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM mail_queue WHERE attempts >= max_attempts")
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.0)
    }
}
