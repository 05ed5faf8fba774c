//! Account and processed-transaction storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub balance: f64,
    /// Carried in the schema and struct for fidelity with the source
    /// system; no optimistic-concurrency check reads it. Mutation is
    /// serialised by the row lock acquired in `get_for_update`, not by
    /// this counter.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone)]
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL UNIQUE,
                balance DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (balance >= 0),
                version INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#;
        match sqlx::query(ddl).execute(pool).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.message().contains("already exists") => {
                debug!("accounts table already exists, continuing");
            }
            Err(e) => return Err(e),
        }

        let tx_ddl = r#"
            CREATE TABLE IF NOT EXISTS processed_transactions (
                id BIGSERIAL PRIMARY KEY,
                transaction_id TEXT NOT NULL UNIQUE,
                order_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                amount DOUBLE PRECISION NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#;
        match sqlx::query(tx_ddl).execute(pool).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.message().contains("already exists") => {
                debug!("processed_transactions table already exists, continuing");
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    pub async fn create(&self, user_id: i64) -> Result<Account, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO accounts (user_id) VALUES ($1) \
             RETURNING id, user_id, balance, version, created_at, updated_at",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        row_to_account(&row)
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<Account>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, user_id, balance, version, created_at, updated_at FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    /// Acquires the row lock on this user's account for the life of `tx`.
    /// Analog of `SELECT ... FOR UPDATE`; callers must hold `tx` open for
    /// as long as the lock needs to be held.
    pub async fn get_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> Result<Option<Account>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, user_id, balance, version, created_at, updated_at \
             FROM accounts WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    pub async fn add_balance(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        delta: f64,
    ) -> Result<Account, sqlx::Error> {
        let row = sqlx::query(
            "UPDATE accounts SET balance = balance + $2, updated_at = NOW() WHERE user_id = $1 \
             RETURNING id, user_id, balance, version, created_at, updated_at",
        )
        .bind(user_id)
        .bind(delta)
        .fetch_one(&mut **tx)
        .await?;
        row_to_account(&row)
    }

    pub async fn insert_processed_transaction(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        transaction_id: &str,
        order_id: i64,
        user_id: i64,
        amount: f64,
        status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO processed_transactions (transaction_id, order_id, user_id, amount, status) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(transaction_id)
        .bind(order_id)
        .bind(user_id)
        .bind(amount)
        .bind(status)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_struct_carries_version_without_using_it() {
        // `version` exists for schema fidelity only; this test documents
        // that no code path here branches on it.
        let account = Account {
            id: 1,
            user_id: 7,
            balance: 100.0,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(account.version, 0);
    }
}
