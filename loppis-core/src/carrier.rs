use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shipping::{Address, Parcel, ShipmentStatus};

/// Everything the carrier needs to book one parcel.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub sender: Address,
    pub recipient: Address,
    pub parcel: Parcel,
    pub service_code: String,
    /// Our own reference, echoed on the label (the order id).
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelDocument {
    Url { url: String },
    Pdf { base64: String },
}

impl LabelDocument {
    /// Something a browser can open: the URL itself, or a PDF data URI.
    pub fn reference(&self) -> String {
        match self {
            LabelDocument::Url { url } => url.clone(),
            LabelDocument::Pdf { base64 } => format!("data:application/pdf;base64,{}", base64),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingConfirmation {
    pub carrier_shipment_id: String,
    pub tracking_number: String,
    pub label: Option<LabelDocument>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// One carrier-reported milestone, already normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierEvent {
    pub status_code: String,
    pub description: String,
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl CarrierEvent {
    /// The carrier does not hand out stable event ids; timestamp + code is
    /// what identifies an event across polls.
    pub fn dedup_key(&self) -> (DateTime<Utc>, &str) {
        (self.occurred_at, self.status_code.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingReport {
    pub status: ShipmentStatus,
    pub status_description: String,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub events: Vec<CarrierEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePoint {
    pub id: String,
    pub name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country_code: String,
    pub distance_meters: Option<u32>,
}

/// Failure talking to the carrier. `payload` keeps the carrier's raw error
/// body for operators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CarrierError {
    #[error("carrier rejected the request ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
        payload: Option<Value>,
    },
    #[error("carrier has no shipment for {0}")]
    NotFound(String),
    #[error("carrier unreachable: {0}")]
    Transient(String),
    #[error("unexpected carrier response: {message}")]
    Malformed {
        message: String,
        payload: Option<Value>,
    },
}

impl CarrierError {
    /// Timeouts, connection failures and carrier-side 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            CarrierError::Transient(_) => true,
            CarrierError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            CarrierError::Rejected { payload, .. } | CarrierError::Malformed { payload, .. } => {
                payload.as_ref()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("carrier booking failed: {0}")]
pub struct BookingError(#[source] pub CarrierError);

#[derive(Debug, Clone, thiserror::Error)]
#[error("carrier tracking failed: {0}")]
pub struct TrackingError(#[source] pub CarrierError);

impl TrackingError {
    /// The carrier has never seen this tracking number.
    pub fn is_not_found(&self) -> bool {
        matches!(self.0, CarrierError::NotFound(_))
    }
}

/// Protocol translator for one logistics provider. Knows nothing about
/// orders or shipments rows; performs no retries.
#[async_trait]
pub trait CarrierClient: Send + Sync {
    /// Stored on shipment rows, e.g. "PostNord".
    fn name(&self) -> &str;

    async fn create_shipment(
        &self,
        request: &BookingRequest,
    ) -> Result<BookingConfirmation, BookingError>;

    async fn track_shipment(&self, tracking_number: &str) -> Result<TrackingReport, TrackingError>;

    /// Empty list when the carrier has nothing nearby.
    async fn find_service_points(
        &self,
        country_code: &str,
        postal_code: &str,
        city: &str,
    ) -> Result<Vec<ServicePoint>, CarrierError>;
}
