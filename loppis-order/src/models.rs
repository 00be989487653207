use chrono::{DateTime, Utc};
use loppis_core::{Address, CarrierEvent, CoreError, Parcel, ShipmentStatus};
use loppis_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
    PartiallyRefunded,
    Disputed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
            OrderStatus::Disputed => "DISPUTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Happy path PENDING -> PAID -> SHIPPED -> DELIVERED, plus the escape
    /// hatches (cancel, refund, dispute) from any non-terminal status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if self.is_terminal() || *self == next {
            return false;
        }
        match (self, next) {
            (Pending, Paid) | (Paid, Shipped) | (Shipped, Delivered) => true,
            (_, Cancelled) | (_, Refunded) | (_, Disputed) => true,
            (Paid | Shipped | Disputed, PartiallyRefunded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            "PARTIALLY_REFUNDED" => Ok(OrderStatus::PartiallyRefunded),
            "DISPUTED" => Ok(OrderStatus::Disputed),
            other => Err(CoreError::UnknownValue(format!("order status {}", other))),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OrderError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

/// Shipping fields as entered at checkout. Any of them may still be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingDetails {
    pub name: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub phone: Option<Masked<String>>,
    pub email: Option<Masked<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub refunded_at: DateTime<Utc>,
}

/// A buyer's purchase. `seller_ids` are the sellers whose products appear in
/// its line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub buyer_id: String,
    pub seller_ids: Vec<String>,
    pub total_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub shipping: ShippingDetails,
    pub cancellation: Option<Cancellation>,
    pub refund: Option<Refund>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The recipient address, or the names of the missing fields.
    pub fn shipping_address(&self) -> Result<Address, Vec<&'static str>> {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }

        let s = &self.shipping;
        let fields = [
            ("name", present(&s.name)),
            ("street", present(&s.street)),
            ("city", present(&s.city)),
            ("postalCode", present(&s.postal_code)),
            ("countryCode", present(&s.country_code)),
        ];
        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(field, _)| *field)
            .collect();

        match fields.map(|(_, v)| v) {
            [Some(name), Some(street), Some(city), Some(postal_code), Some(country_code)] => {
                Ok(Address {
                    name: name.to_string(),
                    street: street.to_string(),
                    city: city.to_string(),
                    postal_code: postal_code.to_string(),
                    country_code: country_code.to_ascii_uppercase(),
                    phone: s.phone.clone(),
                    email: s.email.clone(),
                })
            }
            _ => Err(missing),
        }
    }

    pub fn is_seller(&self, user_id: &str) -> bool {
        self.seller_ids.iter().any(|s| s == user_id)
    }

    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Normalized carrier milestone attached to a shipment. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    pub id: String,
    pub shipment_id: String,
    pub status_code: String,
    pub description: String,
    pub location: Option<String>,
    /// Carrier-reported time, not ingestion time.
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn from_carrier(shipment_id: &str, event: &CarrierEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            shipment_id: shipment_id.to_string(),
            status_code: event.status_code.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            occurred_at: event.occurred_at,
            created_at: Utc::now(),
        }
    }

    pub fn dedup_key(&self) -> (DateTime<Utc>, &str) {
        (self.occurred_at, self.status_code.as_str())
    }
}

/// A booked parcel. Sender, recipient and parcel describe what was physically
/// handed over and are fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub id: String,
    pub order_id: String,
    pub carrier: String,
    pub tracking_number: String,
    pub carrier_shipment_id: String,
    pub service_code: String,
    pub status: ShipmentStatus,
    pub sender: Address,
    pub recipient: Address,
    pub parcel: Parcel,
    pub label_url: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Oldest first unless a caller re-sorts.
    pub events: Vec<TrackingEvent>,
}

impl Shipment {
    pub fn from_new(new: &NewShipment) -> Self {
        let now = Utc::now();
        Self {
            id: new.id.clone(),
            order_id: new.order_id.clone(),
            carrier: new.carrier.clone(),
            tracking_number: new.tracking_number.clone(),
            carrier_shipment_id: new.carrier_shipment_id.clone(),
            service_code: new.service_code.clone(),
            status: ShipmentStatus::Pending,
            sender: new.sender.clone(),
            recipient: new.recipient.clone(),
            parcel: new.parcel.clone(),
            label_url: new.label_url.clone(),
            estimated_delivery: new.estimated_delivery,
            actual_delivery: None,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        }
    }

    pub fn sort_events_newest_first(&mut self) {
        self.events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    }
}

/// Row the orchestrator hands to storage after a successful booking.
#[derive(Debug, Clone, PartialEq)]
pub struct NewShipment {
    pub id: String,
    pub order_id: String,
    pub carrier: String,
    pub tracking_number: String,
    pub carrier_shipment_id: String,
    pub service_code: String,
    pub sender: Address,
    pub recipient: Address,
    pub parcel: Parcel,
    pub label_url: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}
