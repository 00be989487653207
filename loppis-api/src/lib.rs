use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use loppis_carrier::{PostNordClient, PostNordConfig, PostNordEnvironment};
use loppis_core::CarrierClient;
use loppis_store::app_config::CarrierConfig;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod middleware;
pub mod notifications;
pub mod orders;
pub mod service_points;
pub mod shipments;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let protected = Router::new()
        .merge(shipments::routes())
        .merge(service_points::routes())
        .merge(orders::routes())
        .merge(notifications::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    let database = match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!("Database ping failed: {}", e);
                "unavailable"
            }
        },
        None => "disabled",
    };
    let redis = match &state.redis {
        Some(redis) => match redis.ping().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!("Redis ping failed: {}", e);
                "unavailable"
            }
        },
        None => "disabled",
    };

    let healthy = database != "unavailable" && redis != "unavailable";
    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(json!({ "status": label, "database": database, "redis": redis })),
    )
        .into_response()
}

async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let (Some(redis), Some(ConnectInfo(addr))) = (
        state.redis.as_ref(),
        req.extensions().get::<ConnectInfo<SocketAddr>>().cloned(),
    ) else {
        return next.run(req).await;
    };

    let limit = &state.rate_limit;
    match redis
        .check_rate_limit(&addr.ip().to_string(), limit.requests, limit.window_seconds)
        .await
    {
        Ok(true) => next.run(req).await,
        Ok(false) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Rate limit exceeded" })),
        )
            .into_response(),
        Err(e) => {
            // Fail open
            tracing::warn!("Rate limit check failed: {}", e);
            next.run(req).await
        }
    }
}

/// Builds the configured carrier client once at startup.
pub fn build_carrier(carrier_name: &str, config: &CarrierConfig) -> anyhow::Result<Arc<dyn CarrierClient>> {
    match carrier_name.to_ascii_lowercase().as_str() {
        "postnord" => {
            let environment = config
                .environment
                .parse::<PostNordEnvironment>()
                .map_err(|e| anyhow!(e))?;
            let mut postnord = PostNordConfig::new(config.api_key.clone(), environment);
            if let Some(base_url) = &config.base_url {
                postnord.base_url = base_url.trim_end_matches('/').to_string();
            }
            postnord.customer_number = config.customer_number.clone();
            postnord.timeout = Duration::from_secs(config.timeout_seconds.max(1));
            postnord.locale = config.locale.clone();

            let client = PostNordClient::new(postnord).context("Failed to build PostNord HTTP client")?;
            Ok(Arc::new(client))
        }
        other => bail!("Unsupported carrier '{}'", other),
    }
}
