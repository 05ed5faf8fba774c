//! Consumes `payment.results`, applies the NEW -> {FINISHED, CANCELLED}
//! transition inside the inbox transaction, then best-effort publishes the
//! realtime update only once that transaction has actually committed.

use crate::db::{OrderRepository, OrderStatus};
use crate::messages::PaymentResultPayload;
use idempotent_consumer::InboxGuard;
use realtime_bus::{OrderUpdate, RealtimeBus};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct PaymentResultConsumer {
    orders: OrderRepository,
    inbox: InboxGuard,
    bus: Arc<RealtimeBus>,
}

impl PaymentResultConsumer {
    pub fn new(orders: OrderRepository, inbox: InboxGuard, bus: Arc<RealtimeBus>) -> Self {
        Self { orders, inbox, bus }
    }

    /// Handles one `payment.results` delivery body. Returns `Err` only for
    /// malformed payloads or genuine DB errors; a missing or already
    /// terminal order is logged and treated as handled (ack, no retry).
    pub async fn handle(&self, body: Vec<u8>) -> anyhow::Result<()> {
        let payload: PaymentResultPayload = serde_json::from_slice(&body)?;
        let message_id = format!("payment_result:{}", payload.transaction_id);

        let orders = self.orders.clone();
        let pending_update: Arc<Mutex<Option<OrderUpdate>>> = Arc::new(Mutex::new(None));
        let pending_update_clone = pending_update.clone();
        let payload_clone = payload.clone();

        let outcome = self
            .inbox
            .process(&message_id, move |tx| {
                let orders = orders.clone();
                let payload = payload_clone.clone();
                let pending_update = pending_update_clone.clone();
                Box::pin(async move {
                    let Some(order) = orders.get_by_id(tx, payload.order_id).await? else {
                        warn!(order_id = payload.order_id, "payment result for unknown order, dropping");
                        return Ok(());
                    };

                    if order.status.is_terminal() {
                        debug!(order_id = payload.order_id, "order already terminal, dropping payment result");
                        return Ok(());
                    }

                    let new_status = if payload.success { OrderStatus::Finished } else { OrderStatus::Cancelled };
                    let transitioned = orders.transition(tx, payload.order_id, new_status).await?;
                    if !transitioned {
                        return Ok(());
                    }

                    let update = OrderUpdate::new(
                        payload.order_id,
                        payload.user_id,
                        new_status.as_str(),
                        Some(order.amount),
                        payload.message.clone(),
                    );
                    *pending_update.lock().await = Some(update);
                    Ok(())
                })
            })
            .await?;

        if !outcome.is_ok() {
            anyhow::bail!("payment result processing failed: {outcome:?}");
        }

        if let Some(update) = pending_update.lock().await.take() {
            let json = serde_json::to_string(&update)?;
            if let Err(err) = self.bus.publish(payload.user_id, json).await {
                warn!(error = %err, order_id = payload.order_id, "failed to publish realtime order update");
            } else {
                info!(order_id = payload.order_id, status = update.status, "order update published");
            }
        }

        Ok(())
    }
}
