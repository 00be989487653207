use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use futures_util::{Stream, StreamExt};
use loppis_core::Requester;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}/confirm-delivery", post(confirm_delivery))
        .route("/orders/{id}/events", get(order_events))
}

/// POST /orders/{id}/confirm-delivery
/// Buyer confirms the parcel arrived
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(order_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let order = state.orchestrator.confirm_delivery(&order_id, &requester).await?;
    Ok(Json(json!({ "order": order })))
}

/// GET /orders/{id}/events
/// Live fulfillment events for one order
pub async fn order_events(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(order_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let order = state.orchestrator.order_for(&order_id, &requester).await?;
    let rx = state.events_tx.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |message| {
        let order_id = order.id.clone();
        async move {
            // Lagged receivers just skip what they missed
            let event = message.ok()?;
            if event.order_id() != order_id {
                return None;
            }
            match Event::default().event(event.kind()).json_data(&event) {
                Ok(sse_event) => Some(Ok(sse_event)),
                Err(e) => {
                    tracing::warn!("Failed to encode fulfillment event: {}", e);
                    None
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
