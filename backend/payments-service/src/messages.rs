//! Wire shapes for the broker queues this service consumes from and
//! produces to.

use serde::{Deserialize, Serialize};

pub const ORDERS_TO_PAY_QUEUE: &str = "orders.to_pay";
pub const PAYMENT_RESULTS_QUEUE: &str = "payment.results";

/// Consumed from `orders.to_pay`, produced by the Orders service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub timestamp: f64,
}

/// Published to `payment.results`.
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
    fn order_created_payload_parses() {
        let json = r#"{"order_id":1,"user_id":7,"amount":100.0,"timestamp":1700000000.0}"#;
        let payload: OrderCreatedPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.order_id, 1);
        assert_eq!(payload.user_id, 7);
    }
}
