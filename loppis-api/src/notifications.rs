use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use loppis_core::Requester;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/notifications", get(list_notifications))
}

/// GET /notifications
/// The caller's notifications, newest first
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Value>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let notifications = state
        .notifications
        .list_notifications(&requester.user_id, limit)
        .await
        .map_err(loppis_order::FulfillmentError::from)?;
    Ok(Json(json!({ "notifications": notifications })))
}
