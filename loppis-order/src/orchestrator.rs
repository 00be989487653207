use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use loppis_core::{
    Address, BookingRequest, CarrierClient, LabelDocument, Parcel, Requester, ServicePoint,
};
use loppis_shared::models::FulfillmentEvent;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::authz::{authorize, require_role, Access};
use crate::error::FulfillmentError;
use crate::models::{NewShipment, Order, OrderError, OrderStatus, Shipment};
use crate::repository::{BookingGuard, FulfillmentRepository, RepoError};

pub const DEFAULT_SERVICE_CODE: &str = "17";

/// Seller input for one booking.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentRequest {
    pub service_code: Option<String>,
    pub parcel: Parcel,
    /// Replaces the configured default sender for this booking.
    pub sender: Option<Address>,
}

/// Public fields of a freshly booked shipment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentReceipt {
    pub id: String,
    pub tracking_number: String,
    pub label_url: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

impl From<&Shipment> for ShipmentReceipt {
    fn from(shipment: &Shipment) -> Self {
        Self {
            id: shipment.id.clone(),
            tracking_number: shipment.tracking_number.clone(),
            label_url: shipment.label_url.clone(),
            estimated_delivery: shipment.estimated_delivery,
        }
    }
}

/// How often the local write is retried after the carrier accepted a booking.
/// The carrier is never called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff, saturating instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

pub struct ShipmentOrchestrator {
    carrier: Arc<dyn CarrierClient>,
    repo: Arc<dyn FulfillmentRepository>,
    default_sender: Option<Address>,
    default_service_code: String,
    record_retry: RetryPolicy,
    events: Option<broadcast::Sender<FulfillmentEvent>>,
}

impl ShipmentOrchestrator {
    pub fn new(carrier: Arc<dyn CarrierClient>, repo: Arc<dyn FulfillmentRepository>) -> Self {
        Self {
            carrier,
            repo,
            default_sender: None,
            default_service_code: DEFAULT_SERVICE_CODE.to_string(),
            record_retry: RetryPolicy::default(),
            events: None,
        }
    }

    pub fn with_default_sender(mut self, sender: Address) -> Self {
        self.default_sender = Some(sender);
        self
    }

    pub fn with_default_service_code(mut self, code: impl Into<String>) -> Self {
        self.default_service_code = code.into();
        self
    }

    pub fn with_record_retry(mut self, policy: RetryPolicy) -> Self {
        self.record_retry = policy;
        self
    }

    pub fn with_events(mut self, tx: broadcast::Sender<FulfillmentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Books exactly one parcel for a paid order and records it, moving the
    /// order to SHIPPED. Every precondition is checked before the carrier is
    /// called; a carrier failure leaves storage untouched.
    pub async fn create_shipment_for_order(
        &self,
        order_id: &str,
        requester: &Requester,
        request: ShipmentRequest,
    ) -> Result<ShipmentReceipt, FulfillmentError> {
        require_role(requester, Access::Manage)?;
        request.parcel.validate()?;

        let order = self.load_order(order_id).await?;
        authorize(requester, &order, Access::Manage)?;

        let recipient = order.shipping_address().map_err(|missing| {
            FulfillmentError::Validation(format!(
                "order {} shipping address is missing {}",
                order.id,
                missing.join(", ")
            ))
        })?;
        recipient.validate()?;

        let sender = request
            .sender
            .or_else(|| self.default_sender.clone())
            .ok_or_else(|| FulfillmentError::Validation("no sender address available".to_string()))?;
        sender.validate()?;

        let service_code = request
            .service_code
            .filter(|code| !code.trim().is_empty())
            .unwrap_or_else(|| self.default_service_code.clone());

        let booking = BookingRequest {
            sender: sender.normalized(),
            recipient: recipient.normalized(),
            parcel: request.parcel,
            service_code,
            reference: order.id.clone(),
        };

        let mut guard = self.repo.lock_for_booking(&order.id).await?;
        debug!("Booking lock acquired for order {}", order.id);

        let result = self.book_locked(guard.as_mut(), &order, booking).await;

        if let Err(e) = guard.release().await {
            warn!("Failed to release booking lock for order {}: {}", order.id, e);
        }

        let shipment = result?;
        self.publish(FulfillmentEvent::ShipmentCreated {
            order_id: order.id.clone(),
            buyer_id: order.buyer_id.clone(),
            shipment_id: shipment.id.clone(),
            tracking_number: shipment.tracking_number.clone(),
            carrier: shipment.carrier.clone(),
            timestamp: Utc::now(),
        });

        Ok(ShipmentReceipt::from(&shipment))
    }

    /// Runs with the order's booking lock held. Checks and the first write
    /// go through the guard.
    async fn book_locked(
        &self,
        guard: &mut dyn BookingGuard,
        order: &Order,
        booking: BookingRequest,
    ) -> Result<Shipment, FulfillmentError> {
        if guard.has_shipment(&order.id).await? {
            return Err(FulfillmentError::Conflict(format!(
                "order {} already has a shipment",
                order.id
            )));
        }

        // Status may have moved while we waited for the lock
        let current = guard
            .get_order(&order.id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("order {}", order.id)))?;
        if current.status != OrderStatus::Paid {
            return Err(FulfillmentError::Conflict(format!(
                "order {} is {}, only PAID orders can be shipped",
                current.id, current.status
            )));
        }

        info!(
            "Booking {} shipment for order {} (service {})",
            self.carrier.name(),
            order.id,
            booking.service_code
        );
        let confirmation = self.carrier.create_shipment(&booking).await.map_err(|e| {
            warn!("Carrier booking failed for order {}: {}", order.id, e);
            FulfillmentError::CarrierBooking(e)
        })?;
        info!(
            "Carrier accepted order {} as {} (tracking {})",
            order.id, confirmation.carrier_shipment_id, confirmation.tracking_number
        );

        let new_shipment = NewShipment {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            carrier: self.carrier.name().to_string(),
            tracking_number: confirmation.tracking_number,
            carrier_shipment_id: confirmation.carrier_shipment_id,
            service_code: booking.service_code,
            sender: booking.sender,
            recipient: booking.recipient,
            parcel: booking.parcel,
            label_url: confirmation.label.as_ref().map(LabelDocument::reference),
            estimated_delivery: confirmation.estimated_delivery,
        };

        self.record_with_retry(guard, &new_shipment).await
    }

    /// Retries only the local write. The first attempt runs on the guard;
    /// later ones go through the repository since the guard's connection may
    /// be what failed. An attempt can commit and still report a failure, so a
    /// conflict on a later attempt is resolved by looking the shipment up by
    /// its id.
    async fn record_with_retry(
        &self,
        guard: &mut dyn BookingGuard,
        shipment: &NewShipment,
    ) -> Result<Shipment, FulfillmentError> {
        let attempts = self.record_retry.attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let recorded = if attempt == 1 {
                guard.record_shipment(shipment).await
            } else {
                self.repo.record_shipment(shipment).await
            };
            let err = match recorded {
                Ok(recorded) => return Ok(recorded),
                Err(e) => e,
            };

            if attempt > 1 && matches!(err, RepoError::Conflict(_)) {
                if let Ok(Some(recorded)) = self.repo.get_shipment(&shipment.id).await {
                    info!(
                        "Shipment {} was recorded by an earlier attempt",
                        shipment.id
                    );
                    return Ok(recorded);
                }
            }

            if err.is_retryable() && attempt < attempts {
                warn!(
                    "Recording shipment for order {} failed (attempt {}/{}): {}",
                    shipment.order_id, attempt, attempts, err
                );
                tokio::time::sleep(self.record_retry.delay(attempt)).await;
                continue;
            }

            error!(
                "Order {} booked as {} (tracking {}) but could not be recorded: {}",
                shipment.order_id, shipment.carrier_shipment_id, shipment.tracking_number, err
            );
            return Err(FulfillmentError::BookedButNotRecorded {
                order_id: shipment.order_id.clone(),
                carrier_shipment_id: shipment.carrier_shipment_id.clone(),
                tracking_number: shipment.tracking_number.clone(),
                attempts: attempt,
                source: err,
            });
        }
    }

    /// The order, if the requester may see it.
    pub async fn order_for(&self, order_id: &str, requester: &Requester) -> Result<Order, FulfillmentError> {
        let order = self.load_order(order_id).await?;
        authorize(requester, &order, Access::View)?;
        Ok(order)
    }

    /// Shipments of an order with their tracking events newest first.
    pub async fn shipments_for_order(
        &self,
        order_id: &str,
        requester: &Requester,
    ) -> Result<Vec<Shipment>, FulfillmentError> {
        let order = self.load_order(order_id).await?;
        authorize(requester, &order, Access::View)?;

        let mut shipments = self.repo.list_shipments(&order.id).await?;
        for shipment in &mut shipments {
            shipment.sort_events_newest_first();
        }
        Ok(shipments)
    }

    /// Buyer confirms receipt: SHIPPED -> DELIVERED. Confirming an already
    /// delivered order returns it unchanged.
    pub async fn confirm_delivery(
        &self,
        order_id: &str,
        requester: &Requester,
    ) -> Result<Order, FulfillmentError> {
        require_role(requester, Access::Receive)?;
        let mut order = self.load_order(order_id).await?;
        authorize(requester, &order, Access::Receive)?;

        if order.status == OrderStatus::Delivered {
            return Ok(order);
        }
        if order.status != OrderStatus::Shipped {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Delivered,
            }
            .into());
        }

        let updated = self
            .repo
            .update_order_status(&order.id, OrderStatus::Shipped, OrderStatus::Delivered)
            .await?;
        if !updated {
            // Lost a race, most likely against a tracking sync
            let current = self.load_order(order_id).await?;
            if current.status == OrderStatus::Delivered {
                return Ok(current);
            }
            return Err(FulfillmentError::Conflict(format!(
                "order {} is {}, cannot confirm delivery",
                current.id, current.status
            )));
        }

        order.transition_to(OrderStatus::Delivered)?;
        info!("Order {} delivery confirmed by {}", order.id, requester.user_id);
        self.publish(FulfillmentEvent::OrderDelivered {
            order_id: order.id.clone(),
            buyer_id: order.buyer_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(order)
    }

    pub async fn find_service_points(
        &self,
        country_code: &str,
        postal_code: &str,
        city: &str,
    ) -> Result<Vec<ServicePoint>, FulfillmentError> {
        let country_code = country_code.trim();
        if country_code.len() != 2 || !country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FulfillmentError::Validation(
                "countryCode must be a two-letter ISO code".to_string(),
            ));
        }
        if postal_code.trim().is_empty() {
            return Err(FulfillmentError::Validation("postalCode is required".to_string()));
        }

        self.carrier
            .find_service_points(&country_code.to_ascii_uppercase(), postal_code.trim(), city.trim())
            .await
            .map_err(FulfillmentError::ServicePoints)
    }

    async fn load_order(&self, order_id: &str) -> Result<Order, FulfillmentError> {
        self.repo
            .get_order(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("order {}", order_id)))
    }

    fn publish(&self, event: FulfillmentEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("No subscribers for fulfillment events");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        confirmation, paid_order, seller_address, InMemoryFulfillmentRepository, RecordFault,
        ScriptedCarrier,
    };
    use loppis_core::{BookingError, CarrierError, Role};

    fn seller() -> Requester {
        Requester::new("usr_seller", Role::Seller)
    }

    fn parcel_request() -> ShipmentRequest {
        ShipmentRequest {
            service_code: None,
            parcel: Parcel::with_weight(1.2),
            sender: None,
        }
    }

    fn orchestrator(
        carrier: Arc<ScriptedCarrier>,
        repo: Arc<InMemoryFulfillmentRepository>,
    ) -> ShipmentOrchestrator {
        ShipmentOrchestrator::new(carrier, repo)
            .with_default_sender(seller_address())
            .with_record_retry(RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(1),
            })
    }

    async fn setup() -> (Arc<ScriptedCarrier>, Arc<InMemoryFulfillmentRepository>, ShipmentOrchestrator) {
        let carrier = Arc::new(ScriptedCarrier::new());
        let repo = Arc::new(InMemoryFulfillmentRepository::new());
        repo.insert_order(paid_order("ord_1", "usr_buyer", "usr_seller")).await;
        let orchestrator = orchestrator(carrier.clone(), repo.clone());
        (carrier, repo, orchestrator)
    }

    #[tokio::test]
    async fn test_paid_order_is_shipped() {
        let (carrier, repo, orchestrator) = setup().await;
        carrier.push_booking(Ok(confirmation("pn_99", "TRK123"))).await;

        let receipt = orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap();

        assert_eq!(receipt.tracking_number, "TRK123");
        assert_eq!(repo.order("ord_1").await.unwrap().status, OrderStatus::Shipped);
        assert_eq!(repo.shipment_count().await, 1);
        // Written under the booking lock, on the guard
        assert_eq!(repo.guard_record_calls(), 1);
        assert_eq!(repo.record_calls(), 1);

        let shipments = orchestrator.shipments_for_order("ord_1", &seller()).await.unwrap();
        assert_eq!(shipments[0].tracking_number, "TRK123");
        assert_eq!(shipments[0].carrier_shipment_id, "pn_99");
        assert_eq!(shipments[0].id, receipt.id);

        let sent = carrier.last_booking().await.unwrap();
        assert_eq!(sent.reference, "ord_1");
        assert_eq!(sent.service_code, DEFAULT_SERVICE_CODE);
        assert_eq!(sent.recipient.city, "Stockholm");
    }

    #[tokio::test]
    async fn test_second_booking_conflicts_without_carrier_call() {
        let (carrier, repo, orchestrator) = setup().await;
        orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap();

        let err = orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap_err();

        assert!(matches!(err, FulfillmentError::Conflict(_)), "{:?}", err);
        assert_eq!(carrier.booking_calls(), 1);
        assert_eq!(repo.shipment_count().await, 1);
        assert_eq!(repo.order("ord_1").await.unwrap().status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn test_concurrent_bookings_book_once() {
        let carrier = Arc::new(ScriptedCarrier::new().with_booking_delay(Duration::from_millis(50)));
        let repo = Arc::new(InMemoryFulfillmentRepository::new());
        repo.insert_order(paid_order("ord_1", "usr_buyer", "usr_seller")).await;
        let orchestrator = Arc::new(orchestrator(carrier.clone(), repo.clone()));

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .create_shipment_for_order("ord_1", &seller(), parcel_request())
                    .await
            })
        };
        let second = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .create_shipment_for_order("ord_1", &seller(), parcel_request())
                    .await
            })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(FulfillmentError::Conflict(_))))
            .count();

        assert_eq!(ok, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(carrier.booking_calls(), 1);
        assert_eq!(repo.shipment_count().await, 1);
    }

    #[tokio::test]
    async fn test_carrier_failure_leaves_order_untouched() {
        let (carrier, repo, orchestrator) = setup().await;
        carrier
            .push_booking(Err(BookingError(CarrierError::Rejected {
                status: 400,
                message: "Invalid postal code".to_string(),
                payload: Some(serde_json::json!({"message": "Invalid postal code"})),
            })))
            .await;

        let err = orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap_err();

        assert!(matches!(err, FulfillmentError::CarrierBooking(_)));
        assert!(err.is_retryable());
        assert!(err.carrier_payload().is_some());
        assert_eq!(repo.order("ord_1").await.unwrap().status, OrderStatus::Paid);
        assert_eq!(repo.shipment_count().await, 0);
        assert_eq!(repo.record_calls(), 0);

        // Safe to try again
        orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap();
        assert_eq!(repo.order("ord_1").await.unwrap().status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn test_preconditions_checked_before_carrier_call() {
        let (carrier, repo, orchestrator) = setup().await;

        let buyer = Requester::new("usr_buyer", Role::Buyer);
        let err = orchestrator
            .create_shipment_for_order("ord_1", &buyer, parcel_request())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Authorization(_)));

        let stranger = Requester::new("usr_other_seller", Role::Seller);
        let err = orchestrator
            .create_shipment_for_order("ord_1", &stranger, parcel_request())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Authorization(_)));

        let err = orchestrator
            .create_shipment_for_order("ord_missing", &seller(), parcel_request())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));

        let mut bad_parcel = parcel_request();
        bad_parcel.parcel = Parcel::with_weight(0.0);
        let err = orchestrator
            .create_shipment_for_order("ord_1", &seller(), bad_parcel)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let mut incomplete = paid_order("ord_2", "usr_buyer", "usr_seller");
        incomplete.shipping.postal_code = None;
        repo.insert_order(incomplete).await;
        let err = orchestrator
            .create_shipment_for_order("ord_2", &seller(), parcel_request())
            .await
            .unwrap_err();
        match err {
            FulfillmentError::Validation(msg) => assert!(msg.contains("postalCode"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(carrier.booking_calls(), 0);
    }

    #[tokio::test]
    async fn test_admin_may_ship_any_order() {
        let (_, repo, orchestrator) = setup().await;
        let admin = Requester::new("usr_admin", Role::Admin);

        orchestrator
            .create_shipment_for_order("ord_1", &admin, parcel_request())
            .await
            .unwrap();
        assert_eq!(repo.order("ord_1").await.unwrap().status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn test_unpaid_order_conflicts() {
        let (carrier, repo, orchestrator) = setup().await;
        let mut pending = paid_order("ord_2", "usr_buyer", "usr_seller");
        pending.status = OrderStatus::Pending;
        repo.insert_order(pending).await;

        let err = orchestrator
            .create_shipment_for_order("ord_2", &seller(), parcel_request())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Conflict(_)));
        assert_eq!(carrier.booking_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_sender_is_validation_error() {
        let carrier = Arc::new(ScriptedCarrier::new());
        let repo = Arc::new(InMemoryFulfillmentRepository::new());
        repo.insert_order(paid_order("ord_1", "usr_buyer", "usr_seller")).await;
        let orchestrator = ShipmentOrchestrator::new(carrier.clone(), repo);

        let err = orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let mut request = parcel_request();
        request.sender = Some(seller_address());
        request.service_code = Some("19".to_string());
        orchestrator
            .create_shipment_for_order("ord_1", &seller(), request)
            .await
            .unwrap();
        assert_eq!(carrier.last_booking().await.unwrap().service_code, "19");
    }

    #[tokio::test]
    async fn test_record_failure_is_retried_without_rebooking() {
        let (carrier, repo, orchestrator) = setup().await;
        repo.fail_next_records(vec![RecordFault::BeforeCommit, RecordFault::BeforeCommit])
            .await;

        orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap();

        assert_eq!(repo.record_calls(), 3);
        assert_eq!(repo.guard_record_calls(), 1);
        assert_eq!(carrier.booking_calls(), 1);
        assert_eq!(repo.order("ord_1").await.unwrap().status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn test_commit_with_lost_ack_is_recovered() {
        let (carrier, repo, orchestrator) = setup().await;
        repo.fail_next_records(vec![RecordFault::AfterCommit]).await;

        let receipt = orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap();

        assert_eq!(repo.record_calls(), 2);
        assert_eq!(carrier.booking_calls(), 1);
        assert_eq!(repo.shipment_count().await, 1);
        assert!(repo.shipment(&receipt.id).await.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_record_retries_report_booked_but_not_recorded() {
        let (carrier, repo, orchestrator) = setup().await;
        repo.fail_next_records(vec![RecordFault::BeforeCommit; 3]).await;

        let err = orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap_err();

        match &err {
            FulfillmentError::BookedButNotRecorded {
                tracking_number,
                attempts,
                ..
            } => {
                assert_eq!(tracking_number, "TRK1");
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_retryable());
        assert_eq!(carrier.booking_calls(), 1);
        assert_eq!(repo.order("ord_1").await.unwrap().status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_booking_publishes_event() {
        let (carrier, _, orchestrator) = setup().await;
        carrier.push_booking(Ok(confirmation("pn_99", "TRK123"))).await;
        let (tx, mut rx) = broadcast::channel(8);
        let orchestrator = orchestrator.with_events(tx);

        orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            FulfillmentEvent::ShipmentCreated {
                buyer_id,
                tracking_number,
                ..
            } => {
                assert_eq!(buyer_id, "usr_buyer");
                assert_eq!(tracking_number, "TRK123");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirm_delivery() {
        let (_, repo, orchestrator) = setup().await;
        orchestrator
            .create_shipment_for_order("ord_1", &seller(), parcel_request())
            .await
            .unwrap();

        let err = orchestrator.confirm_delivery("ord_1", &seller()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Authorization(_)));

        let buyer = Requester::new("usr_buyer", Role::Buyer);
        let order = orchestrator.confirm_delivery("ord_1", &buyer).await.unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(repo.order("ord_1").await.unwrap().status, OrderStatus::Delivered);

        // Idempotent
        let again = orchestrator.confirm_delivery("ord_1", &buyer).await.unwrap();
        assert_eq!(again.status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_confirm_delivery_requires_shipped_order() {
        let (_, _, orchestrator) = setup().await;
        let buyer = Requester::new("usr_buyer", Role::Buyer);

        let err = orchestrator.confirm_delivery("ord_1", &buyer).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_service_point_lookup_validates_input() {
        let (carrier, _, orchestrator) = setup().await;

        let err = orchestrator.find_service_points("Sweden", "11151", "Stockholm").await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let points = orchestrator.find_service_points("se", "11151", "Stockholm").await.unwrap();
        assert!(points.is_empty());
        assert_eq!(carrier.service_point_calls(), 1);
    }

    #[test]
    fn test_retry_delay_saturates() {
        let policy = RetryPolicy {
            attempts: 5,
            backoff: Duration::from_millis(200),
        };
        assert_eq!(policy.delay(3), Duration::from_millis(600));

        let huge = RetryPolicy {
            attempts: 5,
            backoff: Duration::MAX,
        };
        assert_eq!(huge.delay(3), Duration::MAX);
    }
}
