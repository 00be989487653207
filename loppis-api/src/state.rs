use std::sync::Arc;

use loppis_order::{NotificationRepository, ShipmentOrchestrator, TrackingSynchronizer};
use loppis_shared::models::FulfillmentEvent;
use loppis_store::app_config::RateLimitConfig;
use loppis_store::{DbClient, RedisClient};
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ShipmentOrchestrator>,
    pub synchronizer: Arc<TrackingSynchronizer>,
    pub notifications: Arc<dyn NotificationRepository>,
    /// Pinged by `/health`; `None` when storage is not Postgres.
    pub db: Option<DbClient>,
    /// `None` disables rate limiting.
    pub redis: Option<Arc<RedisClient>>,
    pub events_tx: broadcast::Sender<FulfillmentEvent>,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}
