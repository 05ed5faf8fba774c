use actix_cors::Cors;
use actix_middleware::CorrelationIdMiddleware;
use actix_web::{middleware::Logger, web, App, HttpServer};
use gateway::config::Config;
use gateway::proxy::{proxy, ProxyState};
use gateway::{health, ws};
use realtime_bus::ConnectionRegistry;
use redis_utils::RedisPool;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,actix_web=debug".into()))
        .with(fmt::layer())
        .init();

    let config = Config::from_env().expect("failed to load configuration");
    tracing::info!(instance_id = %config.instance_id, "gateway starting");

    let redis = RedisPool::connect(&config.redis_url, None)
        .await
        .expect("failed to connect to redis");
    let registry = ConnectionRegistry::new();
    let bus = Arc::new(realtime_bus::RealtimeBus::new(redis, registry.clone()));
    {
        let bus = bus.clone();
        let redis_url = config.redis_url.clone();
        tokio::spawn(async move { bus.run_subscriber(redis_url).await });
    }

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .expect("failed to build HTTP client");

    let proxy_state = web::Data::new(ProxyState { config: config.clone(), client });
    let registry_data = web::Data::new(registry);

    let port = config.port;
    HttpServer::new(move || {
        App::new()
            .app_data(proxy_state.clone())
            .app_data(registry_data.clone())
            .wrap(Logger::default())
            .wrap(CorrelationIdMiddleware)
            .wrap(Cors::permissive())
            .route("/health", web::get().to(health::health))
            .route("/health/all", web::get().to(health::health_all))
            .route("/ws/{user_id}", web::get().to(ws::ws_handler))
            .route("/api/{service}/{path:.*}", web::route().to(proxy))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
