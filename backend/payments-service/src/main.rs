use actix_cors::Cors;
use actix_middleware::CorrelationIdMiddleware;
use actix_web::{middleware::Logger, web, App, HttpServer};
use db_pool::DbConfig;
use idempotent_consumer::InboxGuard;
use payments_service::config::Config;
use payments_service::db::AccountRepository;
use payments_service::handlers::{self, AppState};
use payments_service::messages::{ORDERS_TO_PAY_QUEUE, PAYMENT_RESULTS_QUEUE};
use payments_service::order_consumer::OrderConsumer;
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
    tracing::info!(instance_id = %config.instance_id, "payments-service starting");

    let db_config = DbConfig::for_service("payments-service");
    let pool = db_pool::create_pool(db_config)
        .await
        .expect("failed to create database pool");

    AccountRepository::ensure_schema(&pool).await.expect("failed to materialise accounts schema");
    transactional_outbox::SqlxOutboxRepository::ensure_schema(&pool)
        .await
        .expect("failed to materialise outbox schema");
    InboxGuard::ensure_schema(&pool).await.expect("failed to materialise inbox schema");

    let accounts = AccountRepository::new(pool.clone());
    let outbox_repo = Arc::new(transactional_outbox::SqlxOutboxRepository::new(pool.clone()));
    let inbox = InboxGuard::new(pool.clone());

    let connection = transactional_outbox::connect_with_retry(&config.rabbitmq_url).await;
    let publish_channel = connection
        .create_channel()
        .await
        .expect("failed to open broker channel for outbox publisher");
    let publisher = Arc::new(
        transactional_outbox::AmqpOutboxPublisher::new(publish_channel, PAYMENT_RESULTS_QUEUE)
            .await
            .expect("failed to declare payment.results queue"),
    );

    let metrics = transactional_outbox::metrics::OutboxMetrics::new("payments-service");
    let processor = Arc::new(
        transactional_outbox::OutboxProcessor::new(outbox_repo.clone(), publisher, 100, Duration::from_millis(500))
            .with_metrics(metrics),
    );
    {
        let processor = processor.clone();
        tokio::spawn(async move { processor.start().await });
    }

    {
        let consume_channel = connection
            .create_channel()
            .await
            .expect("failed to open broker channel for order consumer");
        let consumer = OrderConsumer::new(accounts.clone(), inbox.clone(), outbox_repo.clone());
        let instance_id = config.instance_id.clone();
        tokio::spawn(async move {
            let result = payments_service::amqp::run_consumer(consume_channel, ORDERS_TO_PAY_QUEUE, &instance_id, |body| {
                let consumer = &consumer;
                async move { consumer.handle(body).await }
            })
            .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "order consumer terminated");
            }
        });
    }

    let state = web::Data::new(AppState { accounts });

    let port = config.port;
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(CorrelationIdMiddleware)
            .wrap(Cors::permissive())
            .route("/health", web::get().to(handlers::health))
            .route("/accounts", web::post().to(handlers::create_account))
            .route("/accounts", web::get().to(handlers::get_account))
            .route("/accounts/balance", web::get().to(handlers::get_account))
            .route("/accounts/topup", web::post().to(handlers::topup))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
