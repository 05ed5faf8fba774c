//! REST handlers. Each one validates `X-User-ID`, then delegates to the
//! order repository inside its own transaction where a write is involved.

use crate::db::OrderRepository;
use actix_web::{web, HttpRequest, HttpResponse};
use error_handling::ServiceError;
use realtime_bus::{OrderUpdate, RealtimeBus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use transactional_outbox::{publish_event, OutboxRepository, SqlxOutboxRepository};

pub struct AppState {
    pub orders: OrderRepository,
    pub outbox: Arc<SqlxOutboxRepository>,
    pub bus: Arc<RealtimeBus>,
}

fn user_id_from_header(req: &HttpRequest) -> Result<i64, ServiceError> {
    let header = req
        .headers()
        .get("X-User-ID")
        .ok_or_else(|| ServiceError::BadRequest("missing X-User-ID header".to_string()))?;

    let value = header
        .to_str()
        .map_err(|_| ServiceError::BadRequest("X-User-ID header is not valid UTF-8".to_string()))?;

    let user_id: i64 = value
        .parse()
        .map_err(|_| ServiceError::BadRequest("X-User-ID must be a positive integer".to_string()))?;

    if user_id <= 0 {
        return Err(ServiceError::BadRequest("X-User-ID must be a positive integer".to_string()));
    }

    Ok(user_id)
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: f64,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub description: Option<String>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<crate::db::Order> for OrderResponse {
    fn from(order: crate::db::Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            amount: order.amount,
            description: order.description,
            status: order.status.as_str().to_string(),
            created_at: order.created_at,
        }
    }
}

pub async fn create_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ServiceError> {
    let user_id = user_id_from_header(&req)?;

    if body.amount <= 0.0 {
        return Err(ServiceError::ValidationError("amount must be positive".to_string()));
    }

    let mut tx = state
        .orders
        .pool()
        .begin()
        .await
        .map_err(ServiceError::from)?;

    let order = state
        .orders
        .insert(&mut tx, user_id, body.amount, body.description.as_deref())
        .await
        .map_err(ServiceError::from)?;

    let payload = crate::messages::OrderCreatedPayload {
        order_id: order.id,
        user_id: order.user_id,
        amount: order.amount,
        timestamp: realtime_bus::monotonic_seconds(),
    };
    let payload_value = serde_json::to_value(&payload).map_err(|e| ServiceError::InternalError(e.to_string()))?;

    publish_event!(&mut tx, &state.outbox, crate::messages::ORDERS_TO_PAY_QUEUE, payload_value)
        .await
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;

    tx.commit().await.map_err(ServiceError::from)?;

    let update = OrderUpdate::new(order.id, order.user_id, "NEW", Some(order.amount), "order created");
    if let Ok(json) = serde_json::to_string(&update) {
        if let Err(err) = state.bus.publish(order.user_id, json).await {
            tracing::warn!(error = %err, order_id = order.id, "failed to publish realtime order update");
        }
    }

    Ok(HttpResponse::Created().json(OrderResponse::from(order)))
}

pub async fn list_orders(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    let user_id = user_id_from_header(&req)?;
    let orders = state.orders.list_for_user(user_id).await.map_err(ServiceError::from)?;
    let response: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(HttpResponse::Ok().json(response))
}

pub async fn get_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ServiceError> {
    let user_id = user_id_from_header(&req)?;
    let order_id = path.into_inner();

    let order = state
        .orders
        .get_for_user(order_id, user_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

pub async fn health(state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    sqlx::query("SELECT 1")
        .execute(state.orders.pool())
        .await
        .map_err(ServiceError::from)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn user_id_header_must_be_a_positive_integer() {
        let req = TestRequest::default().insert_header(("X-User-ID", "7")).to_http_request();
        assert_eq!(user_id_from_header(&req).unwrap(), 7);

        let req = TestRequest::default().insert_header(("X-User-ID", "0")).to_http_request();
        assert!(user_id_from_header(&req).is_err());

        let req = TestRequest::default().insert_header(("X-User-ID", "abc")).to_http_request();
        assert!(user_id_from_header(&req).is_err());

        let req = TestRequest::default().to_http_request();
        assert!(user_id_from_header(&req).is_err());
    }
}
