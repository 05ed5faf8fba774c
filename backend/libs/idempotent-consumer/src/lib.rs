//! # Transactional Inbox Library
//!
//! Provides idempotent consumption of at-least-once broker deliveries using
//! PostgreSQL as the durable dedup store. A message's domain effects and its
//! inbox bookkeeping row commit or roll back together in a single
//! transaction, so a consumer crash between "recorded" and "applied" is
//! impossible: either both happened or neither did.
//!
//! ## Problem
//!
//! Without transaction-scoped dedup:
//! - A redelivered message can be recorded as seen before its effects commit,
//!   silently losing the effect on crash.
//! - Or the effects can commit before the dedup row, letting a racing
//!   redelivery re-apply them.
//!
//! ## Solution
//!
//! `InboxGuard::process` opens one transaction per message and, inside it:
//! 1. Attempts to insert a `(message_id)` row into `inbox_messages`
//!    (`ON CONFLICT (message_id) DO NOTHING`). No row inserted means this
//!    message_id was already claimed by a prior or concurrent delivery.
//! 2. If newly claimed, runs the caller's closure with a `&mut Transaction`
//!    so domain writes and any outbox replies share the same transaction.
//! 3. Marks the inbox row processed and commits.
//!
//! Exactly one commit covers steps 1–3; there is no "maybe applied, maybe
//! not" window.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use idempotent_consumer::{InboxGuard, ProcessingResult};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool, message_id: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let guard = InboxGuard::new(pool);
//!
//! let outcome = guard
//!     .process(message_id, |tx| {
//!         Box::pin(async move {
//!             sqlx::query("UPDATE orders SET status = 'PAID' WHERE id = $1")
//!                 .bind(1_i64)
//!                 .execute(&mut **tx)
//!                 .await?;
//!             Ok(())
//!         })
//!     })
//!     .await?;
//!
//! match outcome {
//!     ProcessingResult::Success => println!("applied"),
//!     ProcessingResult::AlreadyProcessed => println!("duplicate, skipped"),
//!     ProcessingResult::Failed(msg) => eprintln!("rolled back: {msg}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Safety
//!
//! If two consumers race on the same `message_id`, the `INSERT ... ON
//! CONFLICT DO NOTHING` lets exactly one claim the row; the unique
//! constraint on `message_id` makes the other observe zero rows affected
//! and report `AlreadyProcessed` without running the closure.
//!
//! ## Retention
//!
//! `cleanup_old_messages` deletes processed rows older than a configurable
//! retention window, run periodically from a background task, same as the
//! outbox's own housekeeping.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

mod error;

pub use error::{IdempotencyError, IdempotencyResult};

/// Outcome of an `InboxGuard::process` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    /// The message was claimed and its effects committed.
    Success,
    /// The message_id was already claimed by a prior delivery; the closure
    /// did not run.
    AlreadyProcessed,
    /// The closure returned an error; the transaction was rolled back, so
    /// neither the claim nor the effects persisted.
    Failed(String),
}

impl ProcessingResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProcessingResult::Success | ProcessingResult::AlreadyProcessed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessingResult::Failed(_))
    }
}

/// A claimed row in the `inbox_messages` dedup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: i64,
    pub message_id: String,
    pub processed: bool,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Transaction-scoped idempotency guard for inbound broker messages.
#[derive(Clone)]
pub struct InboxGuard {
    pool: PgPool,
}

impl InboxGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent DDL for the inbox table, tolerant of a concurrent creator.
    pub async fn ensure_schema(pool: &PgPool) -> IdempotencyResult<()> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS inbox_messages (
                id BIGSERIAL PRIMARY KEY,
                message_id TEXT NOT NULL UNIQUE,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                received_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                processed_at TIMESTAMPTZ
            )
        "#;
        match sqlx::query(ddl).execute(pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.message().contains("already exists") => {
                debug!("inbox_messages already exists, continuing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether `message_id` already has a committed inbox row.
    /// Exposed for diagnostics; `process` does not need it since the
    /// `INSERT ... ON CONFLICT` already performs the check atomically.
    pub async fn is_processed(&self, message_id: &str) -> IdempotencyResult<bool> {
        Self::validate_message_id(message_id)?;

        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM inbox_messages WHERE message_id = $1 AND processed = TRUE) AS exists",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to check inbox message")?;

        Ok(row.try_get("exists")?)
    }

    /// Claims `message_id` and, if new, runs `effect` inside the same
    /// transaction as the claim and the processed-mark. Exactly one commit
    /// covers claim + effect + mark; a rolled-back transaction leaves no
    /// trace of the attempt at all.
    pub async fn process<'a>(
        &self,
        message_id: &str,
        effect: impl FnOnce(&mut Transaction<'_, Postgres>) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + 'a>>
            + Send
            + 'a,
    ) -> IdempotencyResult<ProcessingResult> {
        Self::validate_message_id(message_id)?;

        let mut tx = self.pool.begin().await?;

        let claimed: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO inbox_messages (message_id)
            VALUES ($1)
            ON CONFLICT (message_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to claim inbox message")?;

        let Some(_claimed_id) = claimed else {
            // Someone else already committed this message_id; nothing to
            // roll back, the transaction never wrote anything observable.
            tx.rollback().await.ok();
            debug!(message_id, "inbox message already processed, skipping");
            return Ok(ProcessingResult::AlreadyProcessed);
        };

        match effect(&mut tx).await {
            Ok(()) => {
                sqlx::query(
                    "UPDATE inbox_messages SET processed = TRUE, processed_at = NOW() WHERE message_id = $1",
                )
                .bind(message_id)
                .execute(&mut *tx)
                .await
                .context("failed to mark inbox message processed")?;

                tx.commit().await?;
                info!(message_id, "inbox message processed");
                Ok(ProcessingResult::Success)
            }
            Err(e) => {
                tx.rollback().await.ok();
                warn!(message_id, error = ?e, "inbox effect failed, rolled back");
                Ok(ProcessingResult::Failed(e.to_string()))
            }
        }
    }

    /// Deletes processed rows older than `retention`. Intended to run
    /// periodically from a background task.
    pub async fn cleanup_old_messages(&self, retention: Duration) -> IdempotencyResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|e| IdempotencyError::Other(anyhow::anyhow!("invalid retention duration: {e}")))?;

        let result = sqlx::query("DELETE FROM inbox_messages WHERE processed = TRUE AND processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to clean up old inbox messages")?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "cleaned up old inbox messages");
        }
        Ok(deleted)
    }

    fn validate_message_id(message_id: &str) -> IdempotencyResult<()> {
        if message_id.is_empty() {
            return Err(IdempotencyError::InvalidEventId("message_id cannot be empty".to_string()));
        }
        if message_id.len() > 255 {
            return Err(IdempotencyError::InvalidEventId(format!(
                "message_id too long: {} characters (max 255)",
                message_id.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_message_id_rejects_empty_and_oversized() {
        assert!(InboxGuard::validate_message_id("msg-123").is_ok());
        assert!(InboxGuard::validate_message_id(&"x".repeat(255)).is_ok());

        let err = InboxGuard::validate_message_id("").unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidEventId(_)));

        let err = InboxGuard::validate_message_id(&"x".repeat(256)).unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidEventId(_)));
    }

    #[test]
    fn processing_result_predicates() {
        assert!(ProcessingResult::Success.is_ok());
        assert!(ProcessingResult::AlreadyProcessed.is_ok());
        assert!(!ProcessingResult::Failed("boom".to_string()).is_ok());

        assert!(ProcessingResult::Failed("boom".to_string()).is_failed());
        assert!(!ProcessingResult::Success.is_failed());
    }
}
