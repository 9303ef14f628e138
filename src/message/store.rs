//! Persisted message store over SQLite.
//!
//! All mutations are tenant-scoped single-row updates. Status transitions
//! use atomic conditional updates so concurrent dispatchers cannot both
//! act on the same row.

use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::SqlitePool;
use thiserror::Error;

use super::types::{
    Direction, EnqueueRequest, FailureReason, InboundMessage, Message, MessageStatus,
};

/// Errors from message store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Enqueue input rejected before anything was persisted
    #[error("Invalid enqueue request: {0}")]
    InvalidRequest(String),

    /// Message does not exist for this tenant
    #[error("Message {id} not found for tenant {owner_id}")]
    NotFound { owner_id: i64, id: i64 },

    /// SQLite operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Metadata serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of a retry-scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Message re-queued with a retry cursor
    Scheduled { next_attempt_at: DateTime<Utc> },
    /// Attempt cap reached; message moved to the terminal dead status
    Dead,
}

/// Tenant-scoped message persistence.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create one outbound message in `queued` state.
    ///
    /// Single atomic insert, no deliverability validation, no network call.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<i64, StoreError> {
        if req.owner_id <= 0 {
            return Err(StoreError::InvalidRequest(
                "owner_id must be positive".to_string(),
            ));
        }
        if req.body_text.trim().is_empty() && !req.has_structured_payload() {
            return Err(StoreError::InvalidRequest(
                "body_text is required unless a structured payload is supplied".to_string(),
            ));
        }

        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (
                owner_id, direction, channel, platform, platform_user_id,
                platform_thread_id, client_id, order_id, order_group_id,
                subject, body_text, metadata, status, retries,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            RETURNING id
            "#,
        )
        .bind(req.owner_id)
        .bind(Direction::Out)
        .bind(req.channel)
        .bind(&req.platform)
        .bind(&req.platform_user_id)
        .bind(&req.platform_thread_id)
        .bind(req.client_id)
        .bind(req.order_id)
        .bind(req.order_group_id)
        .bind(&req.subject)
        .bind(&req.body_text)
        .bind(Json(&req.metadata))
        .bind(MessageStatus::Queued)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            owner_id = req.owner_id,
            message_id = id,
            channel = %req.channel,
            "Message enqueued"
        );

        Ok(id)
    }

    /// Record an inbound message (status `received`, direction `in`).
    pub async fn record_inbound(&self, msg: InboundMessage) -> Result<i64, StoreError> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (
                owner_id, direction, channel, platform, platform_user_id,
                platform_thread_id, client_id, subject, body_text, metadata,
                status, retries, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, 0, ?, ?)
            RETURNING id
            "#,
        )
        .bind(msg.owner_id)
        .bind(Direction::In)
        .bind(msg.channel)
        .bind(&msg.platform)
        .bind(&msg.platform_user_id)
        .bind(&msg.platform_thread_id)
        .bind(msg.client_id)
        .bind(&msg.body_text)
        .bind(Json(&msg.metadata))
        .bind(MessageStatus::Received)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            owner_id = msg.owner_id,
            message_id = id,
            channel = %msg.channel,
            "Inbound message recorded"
        );

        Ok(id)
    }

    /// Fetch one message, tenant-scoped.
    pub async fn get(&self, owner_id: i64, id: i64) -> Result<Option<Message>, StoreError> {
        let msg = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE owner_id = ? AND id = ?",
        )
        .bind(owner_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(msg)
    }

    /// Read-only status lookup, tenant-scoped.
    pub async fn status(
        &self,
        owner_id: i64,
        id: i64,
    ) -> Result<Option<MessageStatus>, StoreError> {
        let status = sqlx::query_scalar::<_, MessageStatus>(
            "SELECT status FROM messages WHERE owner_id = ? AND id = ?",
        )
        .bind(owner_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    /// Atomically claim a queued outbound message for dispatch.
    ///
    /// Returns `false` when another dispatcher won the claim (or the row is
    /// no longer queued).
    pub async fn claim(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ? AND direction = ?
            "#,
        )
        .bind(MessageStatus::Sending)
        .bind(Utc::now())
        .bind(id)
        .bind(MessageStatus::Queued)
        .bind(Direction::Out)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a claim without recording an attempt.
    ///
    /// Used when a pre-network check (address resolution) fails: the row
    /// returns to `queued` so a human can fix the underlying data.
    pub async fn release(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE messages SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(MessageStatus::Queued)
        .bind(Utc::now())
        .bind(id)
        .bind(MessageStatus::Sending)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a successful transport call: `sending` -> `sent`.
    ///
    /// Returns the updated retry counter.
    pub async fn mark_sent(
        &self,
        id: i64,
        platform_msg_id: &str,
        provider_response: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        let diagnostics = serde_json::json!({ "provider_response": provider_response });
        let retries: i64 = sqlx::query_scalar(
            r#"
            UPDATE messages
            SET status = ?, retries = retries + 1, sent_at = ?,
                platform_msg_id = ?, next_attempt_at = NULL, error_message = NULL,
                metadata = json_patch(metadata, ?), updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING retries
            "#,
        )
        .bind(MessageStatus::Sent)
        .bind(Utc::now())
        .bind(platform_msg_id)
        .bind(Json(&diagnostics))
        .bind(Utc::now())
        .bind(id)
        .bind(MessageStatus::Sending)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            message_id = id,
            platform_msg_id = %platform_msg_id,
            retries = retries,
            "Message sent"
        );

        Ok(retries)
    }

    /// Record a failed attempt: `sending` -> `failed`.
    ///
    /// The message is not re-queued here; scheduling a retry is a separate,
    /// explicit decision. Returns the updated retry counter.
    pub async fn mark_failed(
        &self,
        id: i64,
        reason: FailureReason,
        error_message: &str,
        diagnostics: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        let patch = serde_json::json!({
            "last_failure": { "reason": reason.as_str(), "details": diagnostics }
        });
        let retries: i64 = sqlx::query_scalar(
            r#"
            UPDATE messages
            SET status = ?, retries = retries + 1, error_message = ?,
                metadata = json_patch(metadata, ?), updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING retries
            "#,
        )
        .bind(MessageStatus::Failed)
        .bind(error_message)
        .bind(Json(&patch))
        .bind(Utc::now())
        .bind(id)
        .bind(MessageStatus::Sending)
        .fetch_one(&self.pool)
        .await?;

        tracing::warn!(
            message_id = id,
            reason = %reason,
            error = %error_message,
            retries = retries,
            "Message dispatch failed"
        );

        Ok(retries)
    }

    /// Re-queue a failed message with a retry cursor, or mark it dead once
    /// the attempt cap is reached.
    pub async fn schedule_retry(
        &self,
        owner_id: i64,
        id: i64,
        delay: Duration,
        max_attempts: u32,
    ) -> Result<ScheduleOutcome, StoreError> {
        let next_attempt_at = Utc::now() + delay;
        let status: MessageStatus = sqlx::query_scalar(
            r#"
            UPDATE messages
            SET status = CASE WHEN retries >= ? THEN ? ELSE ? END,
                next_attempt_at = CASE WHEN retries >= ? THEN NULL ELSE ? END,
                updated_at = ?
            WHERE owner_id = ? AND id = ? AND status = ?
            RETURNING status
            "#,
        )
        .bind(max_attempts as i64)
        .bind(MessageStatus::Dead)
        .bind(MessageStatus::Queued)
        .bind(max_attempts as i64)
        .bind(next_attempt_at)
        .bind(Utc::now())
        .bind(owner_id)
        .bind(id)
        .bind(MessageStatus::Failed)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { owner_id, id })?;

        match status {
            MessageStatus::Dead => {
                tracing::warn!(
                    owner_id = owner_id,
                    message_id = id,
                    max_attempts = max_attempts,
                    "Retry cap reached, message marked dead"
                );
                Ok(ScheduleOutcome::Dead)
            }
            _ => {
                tracing::debug!(
                    owner_id = owner_id,
                    message_id = id,
                    next_attempt_at = %next_attempt_at,
                    "Retry scheduled"
                );
                Ok(ScheduleOutcome::Scheduled { next_attempt_at })
            }
        }
    }

    /// Eligible queued outbound messages, oldest-first, respecting the
    /// retry cursor. Returns `(owner_id, id)` pairs.
    pub async fn claimable(&self, limit: u32) -> Result<Vec<(i64, i64)>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT owner_id, id FROM messages
            WHERE status = ? AND direction = ?
              AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(MessageStatus::Queued)
        .bind(Direction::Out)
        .bind(Utc::now())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Most recent inbound thread id for a client on a platform.
    ///
    /// Used to recover a destination address when the outbound row has no
    /// thread id stored.
    pub async fn latest_inbound_thread(
        &self,
        owner_id: i64,
        client_id: i64,
        platform: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let thread = sqlx::query_scalar::<_, String>(
            r#"
            SELECT platform_thread_id FROM messages
            WHERE owner_id = ? AND client_id = ? AND direction = ?
              AND platform_thread_id IS NOT NULL
              AND (? IS NULL OR platform = ?)
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(client_id)
        .bind(Direction::In)
        .bind(platform)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await?;

        Ok(thread)
    }

    /// Provider delivery receipt: `sent` -> `delivered`.
    pub async fn mark_delivered(
        &self,
        owner_id: i64,
        platform_msg_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = ?, updated_at = ?
            WHERE owner_id = ? AND platform_msg_id = ? AND status = ?
            "#,
        )
        .bind(MessageStatus::Delivered)
        .bind(Utc::now())
        .bind(owner_id)
        .bind(platform_msg_id)
        .bind(MessageStatus::Sent)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Provider read receipt: `sent`/`delivered` -> `read`.
    pub async fn mark_read(
        &self,
        owner_id: i64,
        platform_msg_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = ?, updated_at = ?
            WHERE owner_id = ? AND platform_msg_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(MessageStatus::Read)
        .bind(Utc::now())
        .bind(owner_id)
        .bind(platform_msg_id)
        .bind(MessageStatus::Sent)
        .bind(MessageStatus::Delivered)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore").finish_non_exhaustive()
    }
}
