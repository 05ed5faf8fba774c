//! Wire shapes for the broker queues this service produces to and consumes
//! from. Kept local rather than in a shared schema crate: Orders and
//! Payments are intentionally decoupled, linked only by the ids carried in
//! these payloads, not by a shared Rust type.

use serde::{Deserialize, Serialize};

pub const ORDERS_TO_PAY_QUEUE: &str = "orders.to_pay";
pub const PAYMENT_RESULTS_QUEUE: &str = "payment.results";

/// Published to `orders.to_pay` when an order is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub timestamp: f64,
}

/// Consumed from `payment.results`, produced by the Payments service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResultPayload {
    pub transaction_id: String,
    pub order_id: i64,
    pub user_id: i64,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_balance: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_created_payload_round_trips() {
        let payload = OrderCreatedPayload {
            order_id: 1,
            user_id: 7,
            amount: 100.0,
            timestamp: 1_700_000_000.0,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: OrderCreatedPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.order_id, 1);
        assert_eq!(back.user_id, 7);
    }

    #[test]
    fn payment_result_payload_omits_remaining_balance_when_absent() {
        let payload = PaymentResultPayload {
            transaction_id: "tx-1".to_string(),
            order_id: 1,
            user_id: 7,
            success: false,
            message: "Insufficient funds".to_string(),
            remaining_balance: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("remaining_balance").is_none());
    }
}
