use actix_cors::Cors;
use actix_middleware::CorrelationIdMiddleware;
use actix_web::{middleware::Logger, web, App, HttpServer};
use db_pool::DbConfig;
use idempotent_consumer::InboxGuard;
use orders_service::config::Config;
use orders_service::db::OrderRepository;
use orders_service::handlers::{self, AppState};
use orders_service::messages::{ORDERS_TO_PAY_QUEUE, PAYMENT_RESULTS_QUEUE};
use orders_service::payment_result_consumer::PaymentResultConsumer;
use realtime_bus::{ConnectionRegistry, RealtimeBus};
use redis_utils::RedisPool;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,actix_web=debug".into()))
        .with(fmt::layer())
        .init();

    let config = Config::from_env().expect("failed to load configuration");
    tracing::info!(instance_id = %config.instance_id, "orders-service starting");

    let db_config = DbConfig::for_service("orders-service");
    let pool = db_pool::create_pool(db_config)
        .await
        .expect("failed to create database pool");

    OrderRepository::ensure_schema(&pool).await.expect("failed to materialise orders schema");
    transactional_outbox::SqlxOutboxRepository::ensure_schema(&pool)
        .await
        .expect("failed to materialise outbox schema");
    InboxGuard::ensure_schema(&pool).await.expect("failed to materialise inbox schema");

    let orders = OrderRepository::new(pool.clone());
    let outbox_repo = Arc::new(transactional_outbox::SqlxOutboxRepository::new(pool.clone()));
    let inbox = InboxGuard::new(pool.clone());

    let connection = transactional_outbox::connect_with_retry(&config.rabbitmq_url).await;
    let publish_channel = connection
        .create_channel()
        .await
        .expect("failed to open broker channel for outbox publisher");
    let publisher = Arc::new(
        transactional_outbox::AmqpOutboxPublisher::new(publish_channel, ORDERS_TO_PAY_QUEUE)
            .await
            .expect("failed to declare orders.to_pay queue"),
    );

    let metrics = transactional_outbox::metrics::OutboxMetrics::new("orders-service");
    let processor = Arc::new(
        transactional_outbox::OutboxProcessor::new(outbox_repo.clone(), publisher, 50, Duration::from_millis(500))
            .with_metrics(metrics),
    );
    {
        let processor = processor.clone();
        tokio::spawn(async move { processor.start().await });
    }

    let redis = RedisPool::connect(&config.redis_url, None)
        .await
        .expect("failed to connect to redis");
    let registry = ConnectionRegistry::new();
    let bus = Arc::new(RealtimeBus::new(redis, registry));
    {
        let bus = bus.clone();
        let redis_url = config.redis_url.clone();
        tokio::spawn(async move { bus.run_subscriber(redis_url).await });
    }

    {
        let consume_channel = connection
            .create_channel()
            .await
            .expect("failed to open broker channel for payment-result consumer");
        let consumer = PaymentResultConsumer::new(orders.clone(), inbox.clone(), bus.clone());
        let instance_id = config.instance_id.clone();
        tokio::spawn(async move {
            let result = orders_service::amqp::run_consumer(consume_channel, PAYMENT_RESULTS_QUEUE, &instance_id, |body| {
                let consumer = &consumer;
                async move { consumer.handle(body).await }
            })
            .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "payment-result consumer terminated");
            }
        });
    }

    let state = web::Data::new(AppState { orders, outbox: outbox_repo, bus: bus.clone() });

    let port = config.port;
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(CorrelationIdMiddleware)
            .wrap(Cors::permissive())
            .route("/health", web::get().to(handlers::health))
            .route("/orders", web::post().to(handlers::create_order))
            .route("/orders", web::get().to(handlers::list_orders))
            .route("/orders/{id}", web::get().to(handlers::get_order))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
