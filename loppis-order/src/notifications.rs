use loppis_shared::models::FulfillmentEvent;
use uuid::Uuid;

use crate::repository::Notification;

/// Buyer-facing notification for a fulfillment event.
pub fn notification_for(event: &FulfillmentEvent) -> Notification {
    let (title, message, timestamp) = match event {
        FulfillmentEvent::ShipmentCreated {
            tracking_number,
            carrier,
            timestamp,
            ..
        } => (
            "Your order has shipped".to_string(),
            format!(
                "Your order was handed to {} with tracking number {}.",
                carrier, tracking_number
            ),
            timestamp,
        ),
        FulfillmentEvent::ShipmentStatusChanged {
            tracking_number,
            status,
            timestamp,
            ..
        } => (
            "Shipment update".to_string(),
            format!("Shipment {} is now {}.", tracking_number, describe_status(status)),
            timestamp,
        ),
        FulfillmentEvent::OrderDelivered { timestamp, .. } => (
            "Order delivered".to_string(),
            "Your order has been delivered.".to_string(),
            timestamp,
        ),
    };

    Notification {
        id: Uuid::new_v4().to_string(),
        user_id: event.buyer_id().to_string(),
        kind: event.kind().to_string(),
        title,
        message,
        link: Some(format!("/orders/{}", event.order_id())),
        created_at: *timestamp,
    }
}

fn describe_status(status: &str) -> String {
    match status {
        "IN_TRANSIT" => "in transit".to_string(),
        "OUT_FOR_DELIVERY" => "out for delivery".to_string(),
        "FAILED_DELIVERY" => "awaiting a new delivery attempt".to_string(),
        other => other.to_lowercase().replace('_', " "),
    }
}
