use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loppis_core::{CarrierEvent, ShipmentStatus};
use serde::{Deserialize, Serialize};

use crate::models::{NewShipment, Order, OrderStatus, Shipment};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoError {
    /// A uniqueness or compare-and-set precondition failed.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Pool exhausted, connection dropped, serialization failure.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepoError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepoError::Unavailable(_) | RepoError::Storage(_))
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Held while a booking is in flight for one order. Reads and the first write
/// of the booking go through the guard, so a booking never needs more than the
/// one storage connection the lock lives on. Dropping the guard releases the
/// lock as well; `release` just does so eagerly.
#[async_trait]
pub trait BookingGuard: Send {
    async fn get_order(&mut self, order_id: &str) -> RepoResult<Option<Order>>;

    async fn has_shipment(&mut self, order_id: &str) -> RepoResult<bool>;

    /// Same contract as [`FulfillmentRepository::record_shipment`], committed
    /// before the lock is released.
    async fn record_shipment(&mut self, shipment: &NewShipment) -> RepoResult<Shipment>;

    async fn release(self: Box<Self>) -> RepoResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: ShipmentStatus,
    pub to: ShipmentStatus,
}

/// Everything one tracking sync wants to write, applied in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingUpdate {
    pub shipment_id: String,
    pub order_id: String,
    /// Oldest first. Inserted as insert-or-ignore on (shipment, time, code).
    pub events: Vec<CarrierEvent>,
    /// Applied only if the stored status still equals `from`.
    pub status: Option<StatusChange>,
    /// Applied only if no delivery time is stored yet.
    pub actual_delivery: Option<DateTime<Utc>>,
    /// Move the order SHIPPED -> DELIVERED (no-op from any other status).
    pub deliver_order: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingWrite {
    pub events_inserted: usize,
    pub status_updated: bool,
    pub order_delivered: bool,
}

/// Storage port for orders, shipments and tracking events.
#[async_trait]
pub trait FulfillmentRepository: Send + Sync {
    async fn get_order(&self, order_id: &str) -> RepoResult<Option<Order>>;

    /// Shipments of an order with their events, oldest event first.
    async fn list_shipments(&self, order_id: &str) -> RepoResult<Vec<Shipment>>;

    async fn get_shipment(&self, shipment_id: &str) -> RepoResult<Option<Shipment>>;

    /// Serializes bookings per order. A second caller waits until the first
    /// guard is released; whatever the first guard recorded is visible to it.
    async fn lock_for_booking(&self, order_id: &str) -> RepoResult<Box<dyn BookingGuard>>;

    /// Inserts the shipment and moves the order PAID -> SHIPPED atomically.
    /// `Conflict` if the order already has a shipment or is no longer PAID.
    async fn record_shipment(&self, shipment: &NewShipment) -> RepoResult<Shipment>;

    async fn apply_tracking(&self, update: &TrackingUpdate) -> RepoResult<TrackingWrite>;

    /// Compare-and-set on the order status. `false` if it was not `from`.
    async fn update_order_status(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepoResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create_notification(&self, notification: &Notification) -> RepoResult<()>;

    /// Newest first.
    async fn list_notifications(&self, user_id: &str, limit: i64) -> RepoResult<Vec<Notification>>;
}
