use serde::{Deserialize, Serialize};

/// Wire shape of an order update, as broadcast to WebSocket clients and
/// carried over the `order_updates` pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub order_id: i64,
    pub user_id: i64,
    pub status: String,
    pub amount: Option<f64>,
    pub timestamp: f64,
    pub message: String,
}

impl OrderUpdate {
    pub fn new(order_id: i64, user_id: i64, status: impl Into<String>, amount: Option<f64>, message: impl Into<String>) -> Self {
        Self {
            kind: "order_update".to_string(),
            order_id,
            user_id,
            status: status.into(),
            amount,
            timestamp: crate::monotonic_seconds(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let update = OrderUpdate::new(1, 7, "NEW", Some(100.0), "order created");
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "order_update");
        assert_eq!(value["order_id"], 1);
        assert_eq!(value["user_id"], 7);
        assert_eq!(value["status"], "NEW");
    }

    #[test]
    fn round_trips_through_json() {
        let update = OrderUpdate::new(42, 7, "FINISHED", None, "done");
        let json = serde_json::to_string(&update).unwrap();
        let back: OrderUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }
}
