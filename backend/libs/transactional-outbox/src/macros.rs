//! Convenience macros for working with the outbox.

/// Insert an outbox row within an already-open transaction.
///
/// This macro simplifies the common pattern: the domain write and the
/// outbox row are inserted through the same `&mut Transaction`, so they
/// commit or roll back together.
///
/// # Usage
///
/// ```rust,no_run
/// use transactional_outbox::{publish_event, SqlxOutboxRepository, OutboxRepository};
/// use sqlx::PgPool;
/// use serde_json::json;
///
/// # async fn example(pool: PgPool, repo: SqlxOutboxRepository) -> Result<(), Box<dyn std::error::Error>> {
/// let mut tx = pool.begin().await?;
///
/// sqlx::query("INSERT INTO orders (user_id, amount) VALUES ($1, $2)")
///     .bind(7_i64)
///     .bind(100.0_f64)
///     .execute(&mut *tx)
///     .await?;
///
/// let _event_id = publish_event!(&mut tx, &repo, "order_created", json!({ "order_id": 1 })).await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! publish_event {
    ($tx:expr, $repo:expr, $event_type:expr, $payload:expr) => {
        $repo.insert($tx, $event_type, &$payload)
    };
}

#[cfg(test)]
mod tests {
    // Macro tests are compile-time checks; if this crate compiles, the
    // macro above is syntactically correct.
}
