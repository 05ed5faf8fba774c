//! Health endpoints: the gateway's own liveness, and an aggregate check
//! across every configured backend instance.

use crate::proxy::ProxyState;
use actix_web::{web, HttpResponse};
use std::time::Duration;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub async fn health_all(state: web::Data<ProxyState>) -> HttpResponse {
    let mut results = serde_json::Map::new();

    for (service, urls) in &state.config.backends {
        let mut instances = Vec::new();
        for url in urls {
            let healthy = state
                .client
                .get(format!("{url}/health"))
                .timeout(Duration::from_secs(5))
                .send()
                .await
                .map(|resp| resp.status().is_success())
                .unwrap_or(false);
            instances.push(serde_json::json!({ "url": url, "healthy": healthy }));
        }
        results.insert(service.clone(), serde_json::Value::Array(instances));
    }

    HttpResponse::Ok().json(serde_json::Value::Object(results))
}
