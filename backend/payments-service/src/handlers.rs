//! REST handlers for account creation, top-up, and balance reads.

use crate::db::AccountRepository;
use actix_web::{web, HttpRequest, HttpResponse};
use error_handling::ServiceError;
use serde::{Deserialize, Serialize};

pub struct AppState {
    pub accounts: AccountRepository,
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

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub user_id: i64,
    pub balance: f64,
}

impl From<crate::db::Account> for AccountResponse {
    fn from(account: crate::db::Account) -> Self {
        Self { user_id: account.user_id, balance: account.balance }
    }
}

#[derive(Debug, Deserialize)]
pub struct TopupRequest {
    pub amount: f64,
}

pub async fn create_account(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    let user_id = user_id_from_header(&req)?;

    if state.accounts.get(user_id).await.map_err(ServiceError::from)?.is_some() {
        return Err(ServiceError::BadRequest(format!("account already exists for user {user_id}")));
    }

    let account = state.accounts.create(user_id).await.map_err(ServiceError::from)?;
    Ok(HttpResponse::Created().json(AccountResponse::from(account)))
}

pub async fn topup(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TopupRequest>,
) -> Result<HttpResponse, ServiceError> {
    let user_id = user_id_from_header(&req)?;

    if body.amount <= 0.0 {
        return Err(ServiceError::ValidationError("amount must be positive".to_string()));
    }

    let mut tx = state.accounts.pool().begin().await.map_err(ServiceError::from)?;

    state
        .accounts
        .get_for_update(&mut tx, user_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("account not found for user {user_id}")))?;

    let account = state
        .accounts
        .add_balance(&mut tx, user_id, body.amount)
        .await
        .map_err(ServiceError::from)?;

    tx.commit().await.map_err(ServiceError::from)?;

    Ok(HttpResponse::Ok().json(AccountResponse::from(account)))
}

pub async fn get_account(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    let user_id = user_id_from_header(&req)?;
    let account = state
        .accounts
        .get(user_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("account not found for user {user_id}")))?;
    Ok(HttpResponse::Ok().json(AccountResponse::from(account)))
}

pub async fn health(state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    sqlx::query("SELECT 1").execute(state.accounts.pool()).await.map_err(ServiceError::from)?;
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

        let req = TestRequest::default().insert_header(("X-User-ID", "-1")).to_http_request();
        assert!(user_id_from_header(&req).is_err());

        let req = TestRequest::default().to_http_request();
        assert!(user_id_from_header(&req).is_err());
    }
}
