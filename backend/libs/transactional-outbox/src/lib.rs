//! # Transactional Outbox Pattern Implementation
//!
//! This library implements the Transactional Outbox pattern to ensure reliable event publishing
//! between services that coordinate through a durable broker. It guarantees that database writes
//! and event publishing happen atomically, preventing data inconsistencies.
//!
//! ## What is the Transactional Outbox Pattern?
//!
//! The Transactional Outbox pattern ensures that:
//! 1. A domain write and a "message to be sent" row commit in one database transaction
//! 2. A background relay reads unpublished rows and publishes them to the broker
//! 3. Rows are marked published only after the broker accepts delivery
//!
//! This guarantees **at-least-once delivery** and prevents event loss even if:
//! - The service crashes after database commit but before the relay publishes
//! - The broker is temporarily unavailable
//! - Network partitions occur
//!
//! ## Usage Example
//!
//! ### 1. Insert a domain row and an outbox row in the same transaction
//!
//! ```rust,no_run
//! use transactional_outbox::{publish_event, OutboxRepository, SqlxOutboxRepository};
//! use sqlx::PgPool;
//! use serde_json::json;
//!
//! async fn create_order(
//!     pool: &PgPool,
//!     outbox_repo: &SqlxOutboxRepository,
//!     user_id: i64,
//!     amount: f64,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!
//!     let order_id: i64 = sqlx::query_scalar(
//!         "INSERT INTO orders (user_id, amount, status) VALUES ($1, $2, 'NEW') RETURNING id",
//!     )
//!     .bind(user_id)
//!     .bind(amount)
//!     .fetch_one(&mut *tx)
//!     .await?;
//!
//!     publish_event!(
//!         &mut tx,
//!         outbox_repo,
//!         "order_created",
//!         json!({ "order_id": order_id, "user_id": user_id, "amount": amount })
//!     )
//!     .await?;
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Start the background relay
//!
//! ```rust,no_run
//! use transactional_outbox::{AmqpOutboxPublisher, OutboxProcessor, SqlxOutboxRepository};
//! use sqlx::PgPool;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = PgPool::connect("postgresql://localhost/orders").await?;
//!     let repository = Arc::new(SqlxOutboxRepository::new(pool));
//!
//!     let connection = transactional_outbox::connect_with_retry("amqp://localhost:5672").await;
//!     let channel = connection.create_channel().await?;
//!     let publisher = Arc::new(AmqpOutboxPublisher::new(channel, "orders.to_pay").await?);
//!
//!     let processor = OutboxProcessor::new(repository, publisher, 50, Duration::from_millis(500));
//!     processor.start().await;
//!     Ok(())
//! }
//! ```

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod error;
pub mod macros;
pub mod metrics;

pub use error::{OutboxError, OutboxResult};

/// A row in a service's outbox table.
///
/// Rows are inserted in the same transaction as the domain change they
/// announce. The relay later drains unprocessed rows to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

/// Repository trait for managing outbox rows in the database.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a new outbox row within an already-open transaction. Returns
    /// the assigned id. MUST be called inside the same transaction as the
    /// domain write it announces, so both commit or neither does.
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> OutboxResult<i64>;

    /// Rows with `processed = false`, ordered by id ascending, bounded by
    /// `limit`. Ordering matches the store's FIFO-per-service guarantee.
    async fn get_unpublished(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>>;

    /// Mark every id in `ids` as processed, in a single transaction. Used
    /// once per relay pass so a crash mid-batch can only leave rows
    /// unprocessed (safe to retry), never falsely marked processed.
    async fn mark_published_batch(&self, ids: &[i64]) -> OutboxResult<()>;

    /// Record a failed publish attempt without touching `processed`; the
    /// row remains reachable by the next scan.
    async fn mark_failed(&self, event_id: i64, error: &str) -> OutboxResult<()>;

    /// Compute pending count and oldest pending age (seconds). Returns
    /// age=0 if nothing is pending.
    async fn pending_stats(&self) -> OutboxResult<(i64, i64)>;
}

/// SQLx-based implementation of `OutboxRepository` against PostgreSQL.
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent DDL for the outbox table. Tolerates concurrent creation
    /// by peer instances: "already exists" is logged and ignored, any
    /// other error aborts startup.
    pub async fn ensure_schema(pool: &PgPool) -> OutboxResult<()> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id BIGSERIAL PRIMARY KEY,
                event_type TEXT NOT NULL,
                payload JSONB NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                processed_at TIMESTAMPTZ,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
        "#;
        match sqlx::query(ddl).execute(pool).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.message().contains("already exists") => {
                debug!("outbox_events already exists, continuing");
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_events_unprocessed ON outbox_events (id) WHERE processed = FALSE",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age_seconds
            FROM outbox_events
            WHERE processed = FALSE
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to compute pending stats")?;

        let pending: i64 = rec.try_get("pending").unwrap_or(0);
        let age: i64 = rec.try_get("age_seconds").unwrap_or(0);
        Ok((pending, age))
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> OutboxResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox_events (event_type, payload)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(event_type)
        .bind(payload)
        .fetch_one(&mut **tx)
        .await
        .context("failed to insert outbox row")?;

        debug!(event_id = id, event_type, "outbox row inserted");
        Ok(id)
    }

    async fn get_unpublished(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, payload, processed, created_at, processed_at, retry_count, last_error
            FROM outbox_events
            WHERE processed = FALSE
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch unprocessed outbox rows")?;

        let events = rows
            .into_iter()
            .map(|row| {
                Ok(OutboxEvent {
                    id: row.try_get("id")?,
                    event_type: row.try_get("event_type")?,
                    payload: row.try_get("payload")?,
                    processed: row.try_get("processed")?,
                    created_at: row.try_get("created_at")?,
                    processed_at: row.try_get("processed_at")?,
                    retry_count: row.try_get("retry_count")?,
                    last_error: row.try_get("last_error")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(events)
    }

    async fn mark_published_batch(&self, ids: &[i64]) -> OutboxResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed = TRUE, processed_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .execute(&mut *tx)
        .await
        .context("failed to mark outbox batch as processed")?;
        tx.commit().await?;

        Ok(())
    }

    async fn mark_failed(&self, event_id: i64, error: &str) -> OutboxResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("failed to record outbox publish failure")?;

        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        SqlxOutboxRepository::pending_stats(self).await
    }
}

/// Publisher trait for handing an outbox row to the broker.
#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()>;
}

/// Opens an AMQP connection, retrying with a capped exponential-ish
/// back-off (5s ceiling) until it succeeds. Used at service startup; the
/// relay and consumer share one connection per process.
pub async fn connect_with_retry(amqp_url: &str) -> Connection {
    let mut delay = Duration::from_millis(500);
    loop {
        match Connection::connect(amqp_url, ConnectionProperties::default().with_default_executor(8))
            .await
        {
            Ok(conn) => return conn,
            Err(err) => {
                warn!(error = %err, delay_ms = delay.as_millis(), "broker connection failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
            }
        }
    }
}

/// AMQP-based `OutboxPublisher`. Declares its target queue durable at
/// construction, then publishes with persistent delivery mode and
/// `application/json` content type, matching the broker queue contract.
pub struct AmqpOutboxPublisher {
    channel: Channel,
    routing_key: String,
}

impl AmqpOutboxPublisher {
    pub async fn new(channel: Channel, routing_key: impl Into<String>) -> OutboxResult<Self> {
        let routing_key = routing_key.into();
        channel
            .queue_declare(
                &routing_key,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| OutboxError::PublishFailed(format!("queue_declare failed: {e}")))?;

        Ok(Self { channel, routing_key })
    }
}

#[async_trait]
impl OutboxPublisher for AmqpOutboxPublisher {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()> {
        let body = serde_json::to_vec(&event.payload)?;

        let properties = BasicProperties::default()
            .with_delivery_mode(2) // persistent
            .with_content_type("application/json".into());

        let confirm = self
            .channel
            .basic_publish(
                "", // default exchange: routing_key addresses the queue directly
                self.routing_key.as_bytes(),
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| OutboxError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| OutboxError::PublishFailed(e.to_string()))?;

        if confirm.is_nack() {
            return Err(OutboxError::PublishFailed(
                "broker nacked publish confirm".to_string(),
            ));
        }

        info!(
            event_id = event.id,
            event_type = %event.event_type,
            routing_key = %self.routing_key,
            "outbox row published"
        );
        Ok(())
    }
}

/// Background relay that drains a service's outbox to the broker.
///
/// Per pass: scan up to `batch_size` unprocessed rows ordered by id, publish
/// each sequentially, then mark the whole batch of successes processed in
/// one transaction. A single-row publish failure is logged and leaves that
/// row `processed = false` for the next pass; it does not abort the batch.
pub struct OutboxProcessor<R: OutboxRepository, P: OutboxPublisher> {
    repository: Arc<R>,
    publisher: Arc<P>,
    batch_size: i64,
    empty_sleep: Duration,
    nonempty_sleep: Duration,
    metrics: Option<crate::metrics::OutboxMetrics>,
}

impl<R: OutboxRepository, P: OutboxPublisher> OutboxProcessor<R, P> {
    /// `poll_interval` is used as the empty-batch sleep; on a non-empty
    /// batch the relay sleeps a fifth of that instead (500ms/100ms at the
    /// spec's defaults), so it drains a backlog faster than it polls an
    /// idle outbox.
    pub fn new(repository: Arc<R>, publisher: Arc<P>, batch_size: i64, poll_interval: Duration) -> Self {
        Self {
            repository,
            publisher,
            batch_size,
            empty_sleep: poll_interval,
            nonempty_sleep: poll_interval / 5,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: crate::metrics::OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs the relay loop forever. Should be spawned as a background task.
    pub async fn start(&self) {
        info!(batch_size = self.batch_size, "outbox relay starting");

        loop {
            match self.process_batch().await {
                Ok(count) if count > 0 => {
                    debug!(published_count = count, "relay pass published rows");
                    tokio::time::sleep(self.nonempty_sleep).await;
                }
                Ok(_) => {
                    tokio::time::sleep(self.empty_sleep).await;
                }
                Err(e) => {
                    error!(error = ?e, "outbox relay pass failed");
                    tokio::time::sleep(self.empty_sleep).await;
                }
            }

            if let Some(metrics) = &self.metrics {
                if let Ok((pending, age)) = self.repository.pending_stats().await {
                    metrics.pending.set(pending);
                    metrics.oldest_pending_age_seconds.set(age);
                }
            }
        }
    }

    /// Processes one batch; returns the number of rows successfully
    /// published and marked processed.
    async fn process_batch(&self) -> OutboxResult<i32> {
        let events = self.repository.get_unpublished(self.batch_size).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut published_ids = Vec::with_capacity(events.len());

        for event in &events {
            match self.publisher.publish(event).await {
                Ok(()) => published_ids.push(event.id),
                Err(e) => {
                    warn!(event_id = event.id, error = %e, "publish failed, will retry next pass");
                    if let Err(mark_err) = self.repository.mark_failed(event.id, &e.to_string()).await {
                        error!(event_id = event.id, error = ?mark_err, "failed to record publish failure");
                    }
                }
            }
        }

        let published_count = published_ids.len() as i32;
        if !published_ids.is_empty() {
            self.repository.mark_published_batch(&published_ids).await?;
            if let Some(metrics) = &self.metrics {
                metrics.published.inc_by(published_count as u64);
            }
        }

        Ok(published_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeRepository {
        events: Mutex<Vec<OutboxEvent>>,
        published: Mutex<Vec<i64>>,
        failed: Mutex<Vec<i64>>,
    }

    fn sample_event(id: i64) -> OutboxEvent {
        OutboxEvent {
            id,
            event_type: "order_created".to_string(),
            payload: serde_json::json!({ "order_id": id }),
            processed: false,
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            last_error: None,
        }
    }

    #[async_trait]
    impl OutboxRepository for FakeRepository {
        async fn insert(
            &self,
            _tx: &mut Transaction<'_, Postgres>,
            _event_type: &str,
            _payload: &serde_json::Value,
        ) -> OutboxResult<i64> {
            unimplemented!("not exercised by relay tests")
        }

        async fn get_unpublished(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
            let events = self.events.lock().unwrap();
            Ok(events.iter().take(limit as usize).cloned().collect())
        }

        async fn mark_published_batch(&self, ids: &[i64]) -> OutboxResult<()> {
            self.published.lock().unwrap().extend_from_slice(ids);
            self.events.lock().unwrap().retain(|e| !ids.contains(&e.id));
            Ok(())
        }

        async fn mark_failed(&self, event_id: i64, _error: &str) -> OutboxResult<()> {
            self.failed.lock().unwrap().push(event_id);
            Ok(())
        }

        async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
            Ok((self.events.lock().unwrap().len() as i64, 0))
        }
    }

    struct FlakyPublisher {
        fail_ids: Vec<i64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OutboxPublisher for FlakyPublisher {
        async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_ids.contains(&event.id) {
                Err(OutboxError::PublishFailed("simulated failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn process_batch_marks_only_successful_publishes() {
        let repo = Arc::new(FakeRepository {
            events: Mutex::new(vec![sample_event(1), sample_event(2), sample_event(3)]),
            published: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        });
        let publisher = Arc::new(FlakyPublisher {
            fail_ids: vec![2],
            calls: AtomicUsize::new(0),
        });

        let processor = OutboxProcessor::new(repo.clone(), publisher, 50, Duration::from_millis(500));
        let published = processor.process_batch().await.unwrap();

        assert_eq!(published, 2);
        assert_eq!(*repo.published.lock().unwrap(), vec![1, 3]);
        assert_eq!(*repo.failed.lock().unwrap(), vec![2]);
        // The failed row is still scheduled for the next scan.
        assert_eq!(repo.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_does_not_touch_the_repository() {
        let repo = Arc::new(FakeRepository {
            events: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        });
        let publisher = Arc::new(FlakyPublisher {
            fail_ids: Vec::new(),
            calls: AtomicUsize::new(0),
        });

        let processor = OutboxProcessor::new(repo.clone(), publisher.clone(), 50, Duration::from_millis(500));
        let published = processor.process_batch().await.unwrap();

        assert_eq!(published, 0);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }
}
