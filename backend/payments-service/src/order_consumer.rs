//! Consumes `orders.to_pay` and runs the payment state machine: account
//! lookup under a row lock, balance check, conditional debit, audit row,
//! and a `payment_result` reply — all inside the one transaction the inbox
//! guard already opened for this message.

use crate::db::AccountRepository;
use crate::messages::{OrderCreatedPayload, PaymentResultPayload, PAYMENT_RESULTS_QUEUE};
use idempotent_consumer::InboxGuard;
use std::sync::Arc;
use transactional_outbox::{OutboxRepository, SqlxOutboxRepository};
use uuid::Uuid;

pub struct OrderConsumer {
    accounts: AccountRepository,
    inbox: InboxGuard,
    outbox: Arc<SqlxOutboxRepository>,
}

impl OrderConsumer {
    pub fn new(accounts: AccountRepository, inbox: InboxGuard, outbox: Arc<SqlxOutboxRepository>) -> Self {
        Self { accounts, inbox, outbox }
    }

    /// Handles one `orders.to_pay` delivery body.
    pub async fn handle(&self, body: Vec<u8>) -> anyhow::Result<()> {
        let payload: OrderCreatedPayload = serde_json::from_slice(&body)?;
        let message_id = derive_message_id(payload.order_id, payload.timestamp);

        let accounts = self.accounts.clone();
        let outbox = self.outbox.clone();
        let payload_clone = payload.clone();
        let message_id_clone = message_id.clone();

        let outcome = self
            .inbox
            .process(&message_id, move |tx| {
                let accounts = accounts.clone();
                let outbox = outbox.clone();
                let payload = payload_clone.clone();
                let message_id = message_id_clone.clone();
                Box::pin(async move {
                    let transaction_id = derive_transaction_id(payload.order_id, &message_id);
                    let result = run_state_machine(&accounts, tx, &payload, &transaction_id).await?;

                    let reply_payload = serde_json::to_value(&result)?;
                    outbox.insert(tx, PAYMENT_RESULTS_QUEUE, &reply_payload).await?;

                    Ok(())
                })
            })
            .await?;

        if !outcome.is_ok() {
            anyhow::bail!("order payment processing failed: {outcome:?}");
        }
        Ok(())
    }
}

/// Deterministic inbox dedup id from payload fields robust to broker
/// redelivery of the same logical event.
fn derive_message_id(order_id: i64, timestamp: f64) -> String {
    let name = format!("{order_id}_{timestamp}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Deterministic per-attempt transaction id, distinct from the inbox
/// message id so a reply's audit trail doesn't collide with dedup keys.
fn derive_transaction_id(order_id: i64, message_id: &str) -> String {
    let name = format!("{order_id}_{message_id}_tx");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

async fn run_state_machine(
    accounts: &AccountRepository,
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payload: &OrderCreatedPayload,
    transaction_id: &str,
) -> anyhow::Result<PaymentResultPayload> {
    let account = accounts.get_for_update(tx, payload.user_id).await?;

    let Some(account) = account else {
        return Ok(PaymentResultPayload {
            transaction_id: transaction_id.to_string(),
            order_id: payload.order_id,
            user_id: payload.user_id,
            success: false,
            message: "Account not found".to_string(),
            remaining_balance: None,
        });
    };

    if account.balance < payload.amount {
        return Ok(PaymentResultPayload {
            transaction_id: transaction_id.to_string(),
            order_id: payload.order_id,
            user_id: payload.user_id,
            success: false,
            message: "Insufficient funds".to_string(),
            remaining_balance: None,
        });
    }

    let updated = accounts.add_balance(tx, payload.user_id, -payload.amount).await?;
    accounts
        .insert_processed_transaction(tx, transaction_id, payload.order_id, payload.user_id, payload.amount, "SUCCESS")
        .await?;

    Ok(PaymentResultPayload {
        transaction_id: transaction_id.to_string(),
        order_id: payload.order_id,
        user_id: payload.user_id,
        success: true,
        message: "Payment successful".to_string(),
        remaining_balance: Some(updated.balance),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_derivation_is_deterministic() {
        let a = derive_message_id(1, 1700000000.0);
        let b = derive_message_id(1, 1700000000.0);
        assert_eq!(a, b);

        let c = derive_message_id(2, 1700000000.0);
        assert_ne!(a, c);
    }

    #[test]
    fn transaction_id_differs_from_message_id() {
        let message_id = derive_message_id(1, 1700000000.0);
        let transaction_id = derive_transaction_id(1, &message_id);
        assert_ne!(message_id, transaction_id);
    }
}
