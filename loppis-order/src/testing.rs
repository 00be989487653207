//! In-memory doubles for the repository and carrier ports. They enforce the
//! same uniqueness rules as the Postgres schema so orchestration races can be
//! exercised without a database.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loppis_core::{
    Address, BookingConfirmation, BookingError, BookingRequest, CarrierClient, CarrierError,
    CarrierEvent, LabelDocument, Parcel, ServicePoint, ShipmentStatus, TrackingError,
    TrackingReport,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{NewShipment, Order, OrderStatus, Shipment, ShippingDetails, TrackingEvent};
use crate::repository::{
    BookingGuard, FulfillmentRepository, Notification, NotificationRepository, RepoError,
    RepoResult, TrackingUpdate, TrackingWrite,
};

/// Injected failure for `record_shipment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFault {
    /// Nothing is written.
    BeforeCommit,
    /// The write lands but the caller sees an error.
    AfterCommit,
}

#[derive(Default)]
struct State {
    orders: HashMap<String, Order>,
    shipments: HashMap<String, Shipment>,
}

/// Shared between the repository and its booking guards.
#[derive(Default)]
struct Store {
    state: Mutex<State>,
    record_faults: Mutex<VecDeque<RecordFault>>,
    record_calls: AtomicUsize,
}

impl Store {
    async fn record_shipment(&self, new: &NewShipment) -> RepoResult<Shipment> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.record_faults.lock().await.pop_front();
        if fault == Some(RecordFault::BeforeCommit) {
            return Err(RepoError::Unavailable("injected failure".to_string()));
        }

        let mut state = self.state.lock().await;
        if state.shipments.contains_key(&new.id)
            || state.shipments.values().any(|s| s.order_id == new.order_id)
        {
            return Err(RepoError::Conflict(format!("order {} already has a shipment", new.order_id)));
        }
        let order = state
            .orders
            .get_mut(&new.order_id)
            .ok_or_else(|| RepoError::NotFound(format!("order {}", new.order_id)))?;
        if order.status != OrderStatus::Paid {
            return Err(RepoError::Conflict(format!("order {} is {}", order.id, order.status)));
        }
        order.status = OrderStatus::Shipped;
        order.updated_at = Utc::now();

        let shipment = Shipment::from_new(new);
        state.shipments.insert(shipment.id.clone(), shipment.clone());

        if fault == Some(RecordFault::AfterCommit) {
            return Err(RepoError::Unavailable("connection reset after commit".to_string()));
        }
        Ok(shipment)
    }
}

#[derive(Default)]
pub struct InMemoryFulfillmentRepository {
    store: Arc<Store>,
    booking_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    tracking_writes: AtomicUsize,
    guard_records: Arc<AtomicUsize>,
}

impl InMemoryFulfillmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_order(&self, order: Order) {
        self.store.state.lock().await.orders.insert(order.id.clone(), order);
    }

    pub async fn order(&self, order_id: &str) -> Option<Order> {
        self.store.state.lock().await.orders.get(order_id).cloned()
    }

    pub async fn shipment(&self, shipment_id: &str) -> Option<Shipment> {
        self.store.state.lock().await.shipments.get(shipment_id).cloned()
    }

    pub async fn shipment_count(&self) -> usize {
        self.store.state.lock().await.shipments.len()
    }

    /// Overwrites a stored shipment's status.
    pub async fn set_shipment_status(&self, shipment_id: &str, status: ShipmentStatus) {
        if let Some(shipment) = self.store.state.lock().await.shipments.get_mut(shipment_id) {
            shipment.status = status;
        }
    }

    pub async fn fail_next_records(&self, faults: Vec<RecordFault>) {
        self.store.record_faults.lock().await.extend(faults);
    }

    /// Record attempts through the repository and through booking guards.
    pub fn record_calls(&self) -> usize {
        self.store.record_calls.load(Ordering::SeqCst)
    }

    /// Record attempts made through a booking guard.
    pub fn guard_record_calls(&self) -> usize {
        self.guard_records.load(Ordering::SeqCst)
    }

    pub fn tracking_writes(&self) -> usize {
        self.tracking_writes.load(Ordering::SeqCst)
    }
}

struct InMemoryBookingGuard {
    store: Arc<Store>,
    guard_records: Arc<AtomicUsize>,
    _lock: OwnedMutexGuard<()>,
}

#[async_trait]
impl BookingGuard for InMemoryBookingGuard {
    async fn get_order(&mut self, order_id: &str) -> RepoResult<Option<Order>> {
        Ok(self.store.state.lock().await.orders.get(order_id).cloned())
    }

    async fn has_shipment(&mut self, order_id: &str) -> RepoResult<bool> {
        let state = self.store.state.lock().await;
        Ok(state.shipments.values().any(|s| s.order_id == order_id))
    }

    async fn record_shipment(&mut self, shipment: &NewShipment) -> RepoResult<Shipment> {
        self.guard_records.fetch_add(1, Ordering::SeqCst);
        self.store.record_shipment(shipment).await
    }

    async fn release(self: Box<Self>) -> RepoResult<()> {
        drop(self);
        Ok(())
    }
}

#[async_trait]
impl FulfillmentRepository for InMemoryFulfillmentRepository {
    async fn get_order(&self, order_id: &str) -> RepoResult<Option<Order>> {
        Ok(self.order(order_id).await)
    }

    async fn list_shipments(&self, order_id: &str) -> RepoResult<Vec<Shipment>> {
        let state = self.store.state.lock().await;
        let mut shipments: Vec<Shipment> = state
            .shipments
            .values()
            .filter(|s| s.order_id == order_id)
            .cloned()
            .collect();
        shipments.sort_by_key(|s| s.created_at);
        Ok(shipments)
    }

    async fn get_shipment(&self, shipment_id: &str) -> RepoResult<Option<Shipment>> {
        Ok(self.shipment(shipment_id).await)
    }

    async fn lock_for_booking(&self, order_id: &str) -> RepoResult<Box<dyn BookingGuard>> {
        let lock = {
            let mut locks = self.booking_locks.lock().await;
            locks.entry(order_id.to_string()).or_default().clone()
        };
        Ok(Box::new(InMemoryBookingGuard {
            store: self.store.clone(),
            guard_records: self.guard_records.clone(),
            _lock: lock.lock_owned().await,
        }))
    }

    async fn record_shipment(&self, new: &NewShipment) -> RepoResult<Shipment> {
        self.store.record_shipment(new).await
    }

    async fn apply_tracking(&self, update: &TrackingUpdate) -> RepoResult<TrackingWrite> {
        self.tracking_writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.store.state.lock().await;
        let mut write = TrackingWrite::default();

        let shipment = state
            .shipments
            .get_mut(&update.shipment_id)
            .ok_or_else(|| RepoError::NotFound(format!("shipment {}", update.shipment_id)))?;

        for event in &update.events {
            let exists = shipment
                .events
                .iter()
                .any(|e| e.dedup_key() == event.dedup_key());
            if !exists {
                shipment.events.push(TrackingEvent::from_carrier(&shipment.id, event));
                write.events_inserted += 1;
            }
        }
        shipment.events.sort_by_key(|e| e.occurred_at);

        if let Some(change) = update.status {
            if shipment.status == change.from {
                shipment.status = change.to;
                write.status_updated = true;
            }
        }
        if shipment.actual_delivery.is_none() {
            shipment.actual_delivery = update.actual_delivery;
        }
        shipment.updated_at = Utc::now();
        let shipment_delivered = shipment.status == ShipmentStatus::Delivered;

        if update.deliver_order && shipment_delivered {
            if let Some(order) = state.orders.get_mut(&update.order_id) {
                if order.status == OrderStatus::Shipped {
                    order.status = OrderStatus::Delivered;
                    order.updated_at = Utc::now();
                    write.order_delivered = true;
                }
            }
        }
        Ok(write)
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepoResult<bool> {
        let mut state = self.store.state.lock().await;
        match state.orders.get_mut(order_id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepoError::NotFound(format!("order {}", order_id))),
        }
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    notifications: Mutex<Vec<Notification>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn create_notification(&self, notification: &Notification) -> RepoResult<()> {
        self.notifications.lock().await.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(&self, user_id: &str, limit: i64) -> RepoResult<Vec<Notification>> {
        let notifications = self.notifications.lock().await;
        let mut mine: Vec<Notification> = notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        mine.truncate(limit.max(0) as usize);
        Ok(mine)
    }
}

/// Carrier double. Bookings come from a queue (a generated confirmation when
/// it is empty); tracking returns the current scripted report until replaced.
#[derive(Default)]
pub struct ScriptedCarrier {
    bookings: Mutex<VecDeque<Result<BookingConfirmation, BookingError>>>,
    tracking: Mutex<Option<Result<TrackingReport, TrackingError>>>,
    service_points: Mutex<Vec<ServicePoint>>,
    last_booking: Mutex<Option<BookingRequest>>,
    booking_delay: Option<Duration>,
    booking_calls: AtomicUsize,
    tracking_calls: AtomicUsize,
    service_point_calls: AtomicUsize,
}

impl ScriptedCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every booking call open, widening race windows.
    pub fn with_booking_delay(mut self, delay: Duration) -> Self {
        self.booking_delay = Some(delay);
        self
    }

    pub async fn push_booking(&self, result: Result<BookingConfirmation, BookingError>) {
        self.bookings.lock().await.push_back(result);
    }

    pub async fn set_tracking(&self, result: Result<TrackingReport, TrackingError>) {
        *self.tracking.lock().await = Some(result);
    }

    pub async fn set_service_points(&self, points: Vec<ServicePoint>) {
        *self.service_points.lock().await = points;
    }

    pub async fn last_booking(&self) -> Option<BookingRequest> {
        self.last_booking.lock().await.clone()
    }

    pub fn booking_calls(&self) -> usize {
        self.booking_calls.load(Ordering::SeqCst)
    }

    pub fn tracking_calls(&self) -> usize {
        self.tracking_calls.load(Ordering::SeqCst)
    }

    pub fn service_point_calls(&self) -> usize {
        self.service_point_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CarrierClient for ScriptedCarrier {
    fn name(&self) -> &str {
        "PostNord"
    }

    async fn create_shipment(
        &self,
        request: &BookingRequest,
    ) -> Result<BookingConfirmation, BookingError> {
        let call = self.booking_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_booking.lock().await = Some(request.clone());
        if let Some(delay) = self.booking_delay {
            tokio::time::sleep(delay).await;
        }

        match self.bookings.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(confirmation(&format!("pn_{}", call), &format!("TRK{}", call))),
        }
    }

    async fn track_shipment(&self, tracking_number: &str) -> Result<TrackingReport, TrackingError> {
        self.tracking_calls.fetch_add(1, Ordering::SeqCst);
        self.tracking
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| Err(TrackingError(CarrierError::NotFound(tracking_number.to_string()))))
    }

    async fn find_service_points(
        &self,
        _country_code: &str,
        _postal_code: &str,
        _city: &str,
    ) -> Result<Vec<ServicePoint>, CarrierError> {
        self.service_point_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.service_points.lock().await.clone())
    }
}

/// PAID order with a complete Swedish shipping address.
pub fn paid_order(id: &str, buyer_id: &str, seller_id: &str) -> Order {
    let now = Utc::now();
    Order {
        id: id.to_string(),
        buyer_id: buyer_id.to_string(),
        seller_ids: vec![seller_id.to_string()],
        total_cents: 25_000,
        currency: "SEK".to_string(),
        status: OrderStatus::Paid,
        shipping: ShippingDetails {
            name: Some("Anna Andersson".to_string()),
            street: Some("Drottninggatan 1".to_string()),
            city: Some("Stockholm".to_string()),
            postal_code: Some("111 51".to_string()),
            country_code: Some("SE".to_string()),
            phone: Some("+46701234567".into()),
            email: Some("anna@example.se".into()),
        },
        cancellation: None,
        refund: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn seller_address() -> Address {
    Address {
        name: "Vintage Seller".to_string(),
        street: "Kungsgatan 10".to_string(),
        city: "Göteborg".to_string(),
        postal_code: "411 19".to_string(),
        country_code: "SE".to_string(),
        phone: None,
        email: None,
    }
}

pub fn confirmation(carrier_shipment_id: &str, tracking_number: &str) -> BookingConfirmation {
    BookingConfirmation {
        carrier_shipment_id: carrier_shipment_id.to_string(),
        tracking_number: tracking_number.to_string(),
        label: Some(LabelDocument::Url {
            url: format!("https://labels.example/{}.pdf", tracking_number),
        }),
        estimated_delivery: None,
    }
}

pub fn carrier_event(status_code: &str, occurred_at: DateTime<Utc>) -> CarrierEvent {
    CarrierEvent {
        status_code: status_code.to_string(),
        description: format!("{} event", status_code),
        location: Some("Stockholm".to_string()),
        occurred_at,
    }
}

pub fn tracking_report(status: ShipmentStatus, events: Vec<CarrierEvent>) -> TrackingReport {
    TrackingReport {
        status,
        status_description: status.as_str().to_string(),
        estimated_delivery: None,
        actual_delivery: None,
        events,
    }
}

/// Unsaved PENDING shipment without events.
pub fn shipment(id: &str, order_id: &str) -> Shipment {
    let recipient = paid_order(order_id, "usr_buyer", "usr_seller")
        .shipping_address()
        .unwrap_or_else(|_| seller_address());
    Shipment::from_new(&NewShipment {
        id: id.to_string(),
        order_id: order_id.to_string(),
        carrier: "PostNord".to_string(),
        tracking_number: format!("TRK-{}", id),
        carrier_shipment_id: format!("pn-{}", id),
        service_code: "17".to_string(),
        sender: seller_address(),
        recipient,
        parcel: Parcel::with_weight(1.2),
        label_url: None,
        estimated_delivery: None,
    })
}
