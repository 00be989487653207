pub mod authz;
pub mod error;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod repository;
pub mod tracking;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use authz::{authorize, Access};
pub use error::{FulfillmentError, Retry};
pub use models::{NewShipment, Order, OrderError, OrderStatus, Shipment, ShippingDetails, TrackingEvent};
pub use notifications::notification_for;
pub use orchestrator::{RetryPolicy, ShipmentOrchestrator, ShipmentReceipt, ShipmentRequest};
pub use repository::{
    BookingGuard, FulfillmentRepository, Notification, NotificationRepository, RepoError,
    RepoResult, StatusChange, TrackingUpdate, TrackingWrite,
};
pub use tracking::{SyncOutcome, TrackingSynchronizer};
