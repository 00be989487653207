use loppis_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, CoreResult};

/// A postal address as handed to the carrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2.
    pub country_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<Masked<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Masked<String>>,
}

impl Address {
    /// Checks required fields and the country code shape.
    pub fn validate(&self) -> CoreResult<()> {
        let required = [
            ("name", &self.name),
            ("street", &self.street),
            ("city", &self.city),
            ("postalCode", &self.postal_code),
            ("countryCode", &self.country_code),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "address is missing {}",
                missing.join(", ")
            )));
        }

        let code = self.country_code.trim();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CoreError::ValidationError(format!(
                "country code '{}' is not ISO 3166-1 alpha-2",
                self.country_code
            )));
        }
        Ok(())
    }

    /// Trimmed copy with an upper-cased country code.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            street: self.street.trim().to_string(),
            city: self.city.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            country_code: self.country_code.trim().to_ascii_uppercase(),
            phone: self.phone.clone(),
            email: self.email.clone(),
        }
    }
}

/// Physical parcel description. Weight in kilograms, dimensions in centimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parcel {
    pub weight_kg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
}

impl Parcel {
    pub fn with_weight(weight_kg: f64) -> Self {
        Self {
            weight_kg,
            length_cm: None,
            width_cm: None,
            height_cm: None,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 {
            return Err(CoreError::ValidationError(
                "parcel weight must be a positive number of kilograms".to_string(),
            ));
        }
        let dimensions = [
            ("length", self.length_cm),
            ("width", self.width_cm),
            ("height", self.height_cm),
        ];
        for (name, value) in dimensions {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(CoreError::ValidationError(format!(
                        "parcel {} must be a positive number of centimetres",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Shipment lifecycle as the marketplace sees it, independent of carrier codes.
///
/// ```text
/// PENDING -> IN_TRANSIT -> OUT_FOR_DELIVERY -> DELIVERED
/// PENDING | IN_TRANSIT | OUT_FOR_DELIVERY -> FAILED_DELIVERY
/// FAILED_DELIVERY -> IN_TRANSIT | OUT_FOR_DELIVERY | DELIVERED | RETURNED
/// any non-terminal -> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    OutForDelivery,
    Delivered,
    FailedDelivery,
    Returned,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "PENDING",
            ShipmentStatus::InTransit => "IN_TRANSIT",
            ShipmentStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            ShipmentStatus::Delivered => "DELIVERED",
            ShipmentStatus::FailedDelivery => "FAILED_DELIVERY",
            ShipmentStatus::Returned => "RETURNED",
            ShipmentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShipmentStatus::Delivered | ShipmentStatus::Returned | ShipmentStatus::Cancelled
        )
    }

    /// Forward-only transition check used when applying carrier reports.
    /// Staying in the same status is not an advance.
    pub fn can_advance_to(&self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;

        if self.is_terminal() || *self == next {
            return false;
        }
        match (self, next) {
            (_, Pending) => false,
            (Pending, _) => true,
            // a parcel can be sent back or stopped without a recorded failed attempt
            (InTransit, _) => true,
            (OutForDelivery, InTransit) => false,
            (OutForDelivery, _) => true,
            // re-attempted delivery
            (FailedDelivery, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ShipmentStatus::Pending),
            "IN_TRANSIT" => Ok(ShipmentStatus::InTransit),
            "OUT_FOR_DELIVERY" => Ok(ShipmentStatus::OutForDelivery),
            "DELIVERED" => Ok(ShipmentStatus::Delivered),
            "FAILED_DELIVERY" => Ok(ShipmentStatus::FailedDelivery),
            "RETURNED" => Ok(ShipmentStatus::Returned),
            "CANCELLED" => Ok(ShipmentStatus::Cancelled),
            other => Err(CoreError::UnknownValue(format!("shipment status {}", other))),
        }
    }
}
