use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use loppis_core::{Address, Parcel, Requester};
use loppis_order::ShipmentRequest;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShipmentRequest {
    pub order_id: String,
    pub service_code: Option<String>,
    /// Kilograms
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub sender_info: Option<Address>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListShipmentsQuery {
    pub order_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/shipments", post(create_shipment).get(list_shipments))
        .route("/shipments/{id}/sync", post(sync_shipment))
}

/// POST /shipments
/// Book the order's parcel with the carrier and mark the order shipped
pub async fn create_shipment(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    payload: Result<Json<CreateShipmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(req) = payload.map_err(|e| AppError::ValidationError(e.body_text()))?;

    if req.order_id.trim().is_empty() {
        return Err(AppError::ValidationError("orderId is required".to_string()));
    }
    let weight = req
        .weight
        .ok_or_else(|| AppError::ValidationError("weight is required".to_string()))?;

    let request = ShipmentRequest {
        service_code: req.service_code,
        parcel: Parcel {
            weight_kg: weight,
            length_cm: req.length,
            width_cm: req.width,
            height_cm: req.height,
        },
        sender: req.sender_info,
    };

    let receipt = state
        .orchestrator
        .create_shipment_for_order(&req.order_id, &requester, request)
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "shipment": receipt }))))
}

/// GET /shipments?orderId=...
/// Shipments with tracking events, newest event first
pub async fn list_shipments(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Query(query): Query<ListShipmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let order_id = query
        .order_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::ValidationError("orderId query parameter is required".to_string()))?;

    let shipments = state.orchestrator.shipments_for_order(&order_id, &requester).await?;
    Ok(Json(json!({ "shipments": shipments })))
}

/// POST /shipments/{id}/sync
/// Pull the carrier's latest tracking state into the shipment
pub async fn sync_shipment(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(shipment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let outcome = state
        .synchronizer
        .sync_shipment_as(&shipment_id, &requester)
        .await?;
    Ok(Json(json!(outcome)))
}
