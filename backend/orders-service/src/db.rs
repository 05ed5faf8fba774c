//! Order storage: schema materialisation plus the repository used by the
//! HTTP handlers and the payment-result consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

/// An order's position in its lifecycle. NEW transitions to exactly one of
/// FINISHED or CANCELLED; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Finished,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Finished => "FINISHED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "FINISHED" => OrderStatus::Finished,
            "CANCELLED" => OrderStatus::Cancelled,
            _ => OrderStatus::New,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Finished | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub description: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        description: row.try_get("description")?,
        status: OrderStatus::from_str(&status),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent DDL, tolerant of a concurrent creator (another instance
    /// starting up at the same time).
    pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS orders (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                amount DOUBLE PRECISION NOT NULL CHECK (amount > 0),
                description TEXT,
                status TEXT NOT NULL DEFAULT 'NEW',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#;
        match sqlx::query(ddl).execute(pool).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.message().contains("already exists") => {
                debug!("orders table already exists, continuing");
            }
            Err(e) => return Err(e),
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_user_id ON orders (user_id, id DESC)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts a new order row in status NEW within the caller's
    /// transaction. The caller is expected to also insert an outbox row in
    /// the same transaction via `publish_event!`.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        amount: f64,
        description: Option<&str>,
    ) -> Result<Order, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, amount, description, status)
            VALUES ($1, $2, $3, 'NEW')
            RETURNING id, user_id, amount, description, status, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(description)
        .fetch_one(&mut **tx)
        .await?;

        row_to_order(&row)
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Order>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, user_id, amount, description, status, created_at, updated_at \
             FROM orders WHERE user_id = $1 ORDER BY id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    pub async fn get_for_user(&self, order_id: i64, user_id: i64) -> Result<Option<Order>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, user_id, amount, description, status, created_at, updated_at \
             FROM orders WHERE id = $1 AND user_id = $2",
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    /// Fetches an order by id alone, for the payment-result consumer which
    /// has no caller-supplied `user_id` to scope by.
    pub async fn get_by_id(&self, tx: &mut Transaction<'_, Postgres>, order_id: i64) -> Result<Option<Order>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, user_id, amount, description, status, created_at, updated_at \
             FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    /// Transitions a NEW order to a terminal status. No-op (returns false)
    /// if the order is already terminal; terminal orders are immutable.
    pub async fn transition(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
        new_status: OrderStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 AND status = 'NEW'",
        )
        .bind(order_id)
        .bind(new_status.as_str())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_strings() {
        assert_eq!(OrderStatus::from_str("NEW").as_str(), "NEW");
        assert_eq!(OrderStatus::from_str("FINISHED").as_str(), "FINISHED");
        assert_eq!(OrderStatus::from_str("CANCELLED").as_str(), "CANCELLED");
        assert_eq!(OrderStatus::from_str("garbage").as_str(), "NEW");
    }

    #[test]
    fn only_finished_and_cancelled_are_terminal() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(OrderStatus::Finished.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }
}
