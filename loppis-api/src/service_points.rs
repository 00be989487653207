use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePointQuery {
    pub country_code: Option<String>,
    pub postal_code: Option<String>,
    #[serde(default)]
    pub city: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/service-points", get(find_service_points))
}

/// GET /service-points?countryCode=SE&postalCode=11151&city=Stockholm
pub async fn find_service_points(
    State(state): State<AppState>,
    Query(query): Query<ServicePointQuery>,
) -> Result<Json<Value>, AppError> {
    let country_code = query
        .country_code
        .ok_or_else(|| AppError::ValidationError("countryCode is required".to_string()))?;
    let postal_code = query
        .postal_code
        .ok_or_else(|| AppError::ValidationError("postalCode is required".to_string()))?;

    let points = state
        .orchestrator
        .find_service_points(&country_code, &postal_code, &query.city)
        .await?;
    Ok(Json(json!({ "servicePoints": points })))
}
