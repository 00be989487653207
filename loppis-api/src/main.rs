use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use loppis_api::{
    app, build_carrier,
    state::{AppState, AuthConfig},
    worker,
};
use loppis_order::{
    FulfillmentRepository, NotificationRepository, RetryPolicy, ShipmentOrchestrator,
    TrackingSynchronizer,
};
use loppis_store::{Config, DbClient, PgFulfillmentRepository, PgNotificationRepository, RedisClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "loppis_api=debug,loppis_order=debug,loppis_carrier=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Loppis fulfillment API on port {}", config.server.port);

    // Database
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis is optional; without it requests are not rate limited
    let redis = match &config.redis {
        Some(redis_config) => {
            let client = match RedisClient::new(&redis_config.url).await {
                Ok(client) => client.ping().await.map(|()| client),
                Err(e) => Err(e),
            };
            match client {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!("Redis unavailable, rate limiting disabled: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    let carrier = build_carrier(&config.fulfillment.carrier_name, &config.carrier)?;
    tracing::info!("Carrier {} configured ({})", carrier.name(), config.carrier.environment);

    let repo: Arc<dyn FulfillmentRepository> = Arc::new(PgFulfillmentRepository::new(db.pool.clone()));
    let notifications: Arc<dyn NotificationRepository> =
        Arc::new(PgNotificationRepository::new(db.pool.clone()));

    // Fulfillment events feed the notification worker and SSE subscribers
    let (events_tx, _) = tokio::sync::broadcast::channel(256);
    tokio::spawn(worker::start_notification_worker(
        events_tx.subscribe(),
        notifications.clone(),
    ));

    let fulfillment = &config.fulfillment;
    let mut orchestrator = ShipmentOrchestrator::new(carrier.clone(), repo.clone())
        .with_default_service_code(fulfillment.default_service_code.clone())
        .with_record_retry(RetryPolicy {
            attempts: fulfillment.record_retry_attempts,
            backoff: Duration::from_millis(fulfillment.record_retry_backoff_ms),
        })
        .with_events(events_tx.clone());
    if let Some(sender) = fulfillment.default_sender.clone() {
        orchestrator = orchestrator.with_default_sender(sender.into());
    }
    let synchronizer = TrackingSynchronizer::new(carrier, repo).with_events(events_tx.clone());

    let app_state = AppState {
        orchestrator: Arc::new(orchestrator),
        synchronizer: Arc::new(synchronizer),
        notifications,
        db: Some(db),
        redis,
        events_tx,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        rate_limit: config.rate_limit.clone(),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
