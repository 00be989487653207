pub mod identity;
pub mod shipping;
pub mod carrier;

pub use identity::{Requester, Role};
pub use shipping::{Address, Parcel, ShipmentStatus};
pub use carrier::{
    BookingConfirmation, BookingError, BookingRequest, CarrierClient, CarrierError, CarrierEvent,
    LabelDocument, ServicePoint, TrackingError, TrackingReport,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Unknown value: {0}")]
    UnknownValue(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
