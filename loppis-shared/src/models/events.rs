use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fulfillment milestones published on the in-process event channel.
///
/// Consumed by the notification worker and the per-order SSE stream. Statuses
/// travel as their wire names (`IN_TRANSIT`, ...) so this crate stays free of
/// the order domain types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentEvent {
    ShipmentCreated {
        order_id: String,
        buyer_id: String,
        shipment_id: String,
        tracking_number: String,
        carrier: String,
        timestamp: DateTime<Utc>,
    },
    ShipmentStatusChanged {
        order_id: String,
        buyer_id: String,
        shipment_id: String,
        tracking_number: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
    OrderDelivered {
        order_id: String,
        buyer_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl FulfillmentEvent {
    pub fn order_id(&self) -> &str {
        match self {
            FulfillmentEvent::ShipmentCreated { order_id, .. }
            | FulfillmentEvent::ShipmentStatusChanged { order_id, .. }
            | FulfillmentEvent::OrderDelivered { order_id, .. } => order_id,
        }
    }

    pub fn buyer_id(&self) -> &str {
        match self {
            FulfillmentEvent::ShipmentCreated { buyer_id, .. }
            | FulfillmentEvent::ShipmentStatusChanged { buyer_id, .. }
            | FulfillmentEvent::OrderDelivered { buyer_id, .. } => buyer_id,
        }
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentEvent::ShipmentCreated { .. } => "shipment_created",
            FulfillmentEvent::ShipmentStatusChanged { .. } => "shipment_status_changed",
            FulfillmentEvent::OrderDelivered { .. } => "order_delivered",
        }
    }
}
