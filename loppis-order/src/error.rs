use loppis_core::{BookingError, CarrierError, CoreError, TrackingError};

use crate::models::OrderError;
use crate::repository::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Nothing was booked; safe to try again.
    #[error(transparent)]
    CarrierBooking(#[from] BookingError),

    #[error(transparent)]
    CarrierTracking(#[from] TrackingError),

    #[error("service point lookup failed: {0}")]
    ServicePoints(#[source] CarrierError),

    /// The carrier accepted the booking but storing it kept failing. Retrying
    /// would book a second parcel; needs manual reconciliation.
    #[error(
        "order {order_id} was booked as {carrier_shipment_id} (tracking {tracking_number}) \
         but could not be recorded after {attempts} attempts: {source}"
    )]
    BookedButNotRecorded {
        order_id: String,
        carrier_shipment_id: String,
        tracking_number: String,
        attempts: u32,
        #[source]
        source: RepoError,
    },

    #[error(transparent)]
    Repository(#[from] RepoError),
}

/// What the caller should tell the user about trying again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Nothing happened at the carrier; the same request may be sent again.
    Safe,
    /// Retrying cannot help, or would book a second parcel.
    Never,
}

impl FulfillmentError {
    pub fn retry_advice(&self) -> Retry {
        if self.is_retryable() {
            Retry::Safe
        } else {
            Retry::Never
        }
    }

    /// Whether the same request may simply be sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FulfillmentError::CarrierBooking(_)
            | FulfillmentError::CarrierTracking(_)
            | FulfillmentError::ServicePoints(_) => true,
            FulfillmentError::Repository(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Raw carrier body, when there is one.
    pub fn carrier_payload(&self) -> Option<&serde_json::Value> {
        match self {
            FulfillmentError::CarrierBooking(e) => e.0.payload(),
            FulfillmentError::CarrierTracking(e) => e.0.payload(),
            FulfillmentError::ServicePoints(e) => e.payload(),
            _ => None,
        }
    }
}

impl From<CoreError> for FulfillmentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => FulfillmentError::Validation(msg),
            CoreError::UnknownValue(msg) => FulfillmentError::Validation(msg),
        }
    }
}

impl From<OrderError> for FulfillmentError {
    fn from(err: OrderError) -> Self {
        FulfillmentError::Conflict(err.to_string())
    }
}
