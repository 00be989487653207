use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use loppis_order::{FulfillmentError, RepoError, Retry};
use serde_json::{json, Value};

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    /// Carrier or storage trouble the user can see, with a retry hint.
    UpstreamError {
        message: String,
        details: Value,
        retryable: bool,
    },
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::UpstreamError {
                message,
                details,
                retryable,
            } => {
                tracing::error!("Fulfillment failure: {} ({})", message, details);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": message, "details": details, "retryable": retryable }),
                )
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<FulfillmentError> for AppError {
    fn from(err: FulfillmentError) -> Self {
        let retryable = err.retry_advice() == Retry::Safe;
        match err {
            FulfillmentError::Authorization(msg) => AppError::AuthorizationError(msg),
            FulfillmentError::Validation(msg) => AppError::ValidationError(msg),
            FulfillmentError::NotFound(msg) => AppError::NotFoundError(msg),
            FulfillmentError::Conflict(msg) => AppError::ConflictError(msg),
            FulfillmentError::CarrierBooking(_)
            | FulfillmentError::CarrierTracking(_)
            | FulfillmentError::ServicePoints(_) => {
                let details = err
                    .carrier_payload()
                    .cloned()
                    .unwrap_or_else(|| Value::String(err.to_string()));
                let message = match err {
                    FulfillmentError::CarrierBooking(_) => "Shipment was not booked with the carrier",
                    FulfillmentError::CarrierTracking(_) => "Tracking lookup with the carrier failed",
                    _ => "Service point lookup with the carrier failed",
                };
                AppError::UpstreamError {
                    message: message.to_string(),
                    details,
                    retryable,
                }
            }
            FulfillmentError::BookedButNotRecorded {
                ref order_id,
                ref carrier_shipment_id,
                ref tracking_number,
                ..
            } => AppError::UpstreamError {
                message: "Shipment was booked but could not be recorded; contact support".to_string(),
                details: json!({
                    "orderId": order_id,
                    "carrierShipmentId": carrier_shipment_id,
                    "trackingNumber": tracking_number,
                    "cause": err.to_string(),
                }),
                retryable: false,
            },
            FulfillmentError::Repository(RepoError::NotFound(msg)) => AppError::NotFoundError(msg),
            FulfillmentError::Repository(RepoError::Conflict(msg)) => AppError::ConflictError(msg),
            FulfillmentError::Repository(e) => AppError::UpstreamError {
                message: "Storage is temporarily unavailable".to_string(),
                details: Value::String(e.to_string()),
                retryable,
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loppis_core::{BookingError, CarrierError};

    fn retry_hint(err: FulfillmentError) -> Option<bool> {
        match AppError::from(err) {
            AppError::UpstreamError { retryable, .. } => Some(retryable),
            _ => None,
        }
    }

    #[test]
    fn test_retry_hint_follows_retry_advice() {
        let timeout = BookingError(CarrierError::Transient("timeout".to_string()));
        assert_eq!(retry_hint(timeout.into()), Some(true));

        let storage = FulfillmentError::Repository(RepoError::Unavailable("pool timed out".to_string()));
        assert_eq!(retry_hint(storage), Some(true));

        let unrecorded = FulfillmentError::BookedButNotRecorded {
            order_id: "ord_1".to_string(),
            carrier_shipment_id: "pn_99".to_string(),
            tracking_number: "TRK123".to_string(),
            attempts: 3,
            source: RepoError::Unavailable("pool timed out".to_string()),
        };
        assert_eq!(retry_hint(unrecorded), Some(false));
    }
}
