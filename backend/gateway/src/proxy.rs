//! Request router: validates `X-User-ID`, selects a backend instance by
//! `user_id mod N` affinity hashing, and forwards the request.

use crate::config::Config;
use actix_web::{web, HttpRequest, HttpResponse};
use error_handling::ServiceError;
use std::str::FromStr;

pub struct ProxyState {
    pub config: Config,
    pub client: reqwest::Client,
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

pub async fn proxy(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Bytes,
    state: web::Data<ProxyState>,
) -> Result<HttpResponse, ServiceError> {
    let (service, rest) = path.into_inner();
    let user_id = user_id_from_header(&req)?;

    let backend = state
        .config
        .pick_backend(&service, user_id)
        .ok_or_else(|| ServiceError::NotFound(format!("unknown service: {service}")))?;

    let mut target_url = format!("{backend}/{rest}");
    if let Some(query) = req.uri().query() {
        target_url.push('?');
        target_url.push_str(query);
    }
    let peer_addr = req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default();

    let method = reqwest::Method::from_str(req.method().as_str())
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;

    let mut builder = state
        .client
        .request(method, &target_url)
        .timeout(state.config.request_timeout)
        .body(body.to_vec());

    for (name, value) in req.headers() {
        if name == actix_web::http::header::HOST {
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            builder = builder.header(name.as_str(), value_str);
        }
    }
    builder = builder
        .header("X-Forwarded-For", peer_addr)
        .header("X-Original-Path", req.uri().to_string());

    let response = builder.send().await.map_err(map_reqwest_error)?;

    let status = actix_web::http::StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    let body_bytes = response.bytes().await.map_err(map_reqwest_error)?;

    let mut builder = HttpResponse::build(status);
    let json_value: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
    Ok(builder.json(json_value))
}

fn map_reqwest_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout
    } else if err.is_connect() {
        ServiceError::ServiceUnavailable
    } else {
        ServiceError::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn user_id_header_must_be_a_positive_integer() {
        let req = TestRequest::default().insert_header(("X-User-ID", "7")).to_http_request();
        assert_eq!(user_id_from_header(&req).unwrap(), 7);

        let req = TestRequest::default().to_http_request();
        assert!(user_id_from_header(&req).is_err());
    }
}
