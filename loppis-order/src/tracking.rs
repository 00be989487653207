use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loppis_core::{CarrierClient, CarrierEvent, Requester, ShipmentStatus, TrackingReport};
use loppis_shared::models::FulfillmentEvent;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::authz::{authorize, Access};
use crate::error::FulfillmentError;
use crate::models::{Order, Shipment};
use crate::repository::{FulfillmentRepository, StatusChange, TrackingUpdate};

/// Result of one reconciliation against the carrier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// Stored state after the sync, events newest first.
    pub shipment: Shipment,
    pub new_events: usize,
    pub status_changed: bool,
    pub order_delivered: bool,
}

/// Computes what a carrier report adds to the stored shipment. Returns `None`
/// when there is nothing to write.
pub fn plan_update(shipment: &Shipment, report: &TrackingReport) -> Option<TrackingUpdate> {
    let mut seen: HashSet<(DateTime<Utc>, String)> = shipment
        .events
        .iter()
        .map(|e| (e.occurred_at, e.status_code.clone()))
        .collect();

    let mut events: Vec<CarrierEvent> = report
        .events
        .iter()
        .filter(|e| seen.insert((e.occurred_at, e.status_code.clone())))
        .cloned()
        .collect();
    events.sort_by_key(|e| e.occurred_at);

    let status = if shipment.status.can_advance_to(report.status) {
        Some(StatusChange {
            from: shipment.status,
            to: report.status,
        })
    } else {
        if report.status != shipment.status {
            warn!(
                "Ignoring carrier status {} for shipment {}: stored status is {}",
                report.status, shipment.id, shipment.status
            );
        }
        None
    };

    let effective = status.map(|c| c.to).unwrap_or(shipment.status);
    let actual_delivery = match (effective, shipment.actual_delivery) {
        (ShipmentStatus::Delivered, None) => report.actual_delivery,
        _ => None,
    };

    if events.is_empty() && status.is_none() && actual_delivery.is_none() {
        return None;
    }

    Some(TrackingUpdate {
        shipment_id: shipment.id.clone(),
        order_id: shipment.order_id.clone(),
        events,
        status,
        actual_delivery,
        deliver_order: effective == ShipmentStatus::Delivered,
    })
}

/// Reconciles stored shipments with the carrier's view. Never caches carrier
/// state; the stored row is re-read on every call.
pub struct TrackingSynchronizer {
    carrier: Arc<dyn CarrierClient>,
    repo: Arc<dyn FulfillmentRepository>,
    events: Option<broadcast::Sender<FulfillmentEvent>>,
}

impl TrackingSynchronizer {
    pub fn new(carrier: Arc<dyn CarrierClient>, repo: Arc<dyn FulfillmentRepository>) -> Self {
        Self {
            carrier,
            repo,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: broadcast::Sender<FulfillmentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Sync on behalf of a user who must be able to see the order.
    pub async fn sync_shipment_as(
        &self,
        shipment_id: &str,
        requester: &Requester,
    ) -> Result<SyncOutcome, FulfillmentError> {
        let shipment = self.load_shipment(shipment_id).await?;
        let order = self
            .repo
            .get_order(&shipment.order_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("order {}", shipment.order_id)))?;
        authorize(requester, &order, Access::View)?;

        self.reconcile(shipment, Some(order)).await
    }

    /// Sync for trusted callers such as an external poller.
    pub async fn sync_shipment(&self, shipment_id: &str) -> Result<SyncOutcome, FulfillmentError> {
        let shipment = self.load_shipment(shipment_id).await?;
        self.reconcile(shipment, None).await
    }

    async fn reconcile(
        &self,
        shipment: Shipment,
        order: Option<Order>,
    ) -> Result<SyncOutcome, FulfillmentError> {
        let report = self
            .carrier
            .track_shipment(&shipment.tracking_number)
            .await
            .map_err(|e| {
                warn!("Tracking lookup failed for shipment {}: {}", shipment.id, e);
                FulfillmentError::CarrierTracking(e)
            })?;

        let Some(update) = plan_update(&shipment, &report) else {
            debug!("Shipment {} is up to date", shipment.id);
            let mut shipment = shipment;
            shipment.sort_events_newest_first();
            return Ok(SyncOutcome {
                shipment,
                new_events: 0,
                status_changed: false,
                order_delivered: false,
            });
        };

        let write = self.repo.apply_tracking(&update).await?;
        info!(
            "Shipment {} synced: {} new events, status updated: {}, order delivered: {}",
            shipment.id, write.events_inserted, write.status_updated, write.order_delivered
        );

        if write.status_updated || write.order_delivered {
            let buyer_id = match &order {
                Some(order) => Some(order.buyer_id.clone()),
                None => self
                    .repo
                    .get_order(&shipment.order_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|o| o.buyer_id),
            };
            match buyer_id {
                Some(buyer_id) => self.publish_changes(
                    &shipment,
                    &update,
                    write.status_updated,
                    write.order_delivered,
                    &buyer_id,
                ),
                None => warn!("Order {} not found, skipping notifications", shipment.order_id),
            }
        }

        let mut refreshed = self.load_shipment(&shipment.id).await?;
        refreshed.sort_events_newest_first();

        Ok(SyncOutcome {
            shipment: refreshed,
            new_events: write.events_inserted,
            status_changed: write.status_updated,
            order_delivered: write.order_delivered,
        })
    }

    fn publish_changes(
        &self,
        shipment: &Shipment,
        update: &TrackingUpdate,
        status_updated: bool,
        order_delivered: bool,
        buyer_id: &str,
    ) {
        let Some(tx) = &self.events else {
            return;
        };
        let now = Utc::now();

        if let (true, Some(change)) = (status_updated, update.status) {
            let _ = tx.send(FulfillmentEvent::ShipmentStatusChanged {
                order_id: shipment.order_id.clone(),
                buyer_id: buyer_id.to_string(),
                shipment_id: shipment.id.clone(),
                tracking_number: shipment.tracking_number.clone(),
                status: change.to.as_str().to_string(),
                timestamp: now,
            });
        }
        if order_delivered {
            let _ = tx.send(FulfillmentEvent::OrderDelivered {
                order_id: shipment.order_id.clone(),
                buyer_id: buyer_id.to_string(),
                timestamp: now,
            });
        }
    }

    async fn load_shipment(&self, shipment_id: &str) -> Result<Shipment, FulfillmentError> {
        self.repo
            .get_shipment(shipment_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("shipment {}", shipment_id)))
    }
}
