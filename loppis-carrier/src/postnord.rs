use async_trait::async_trait;
use loppis_core::{
    BookingConfirmation, BookingError, BookingRequest, CarrierClient, CarrierError, ServicePoint,
    TrackingError, TrackingReport,
};
use loppis_shared::Masked;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::wire::{
    booking_instruction, fault_message, LabelResponse, ServicePointEnvelope, TrackingEnvelope,
};

const BOOKING_PATH: &str = "/rest/shipment/v3/edi/labels/pdf";
const TRACKING_PATH: &str = "/rest/shipment/v5/trackandtrace/findByIdentifier.json";
const SERVICE_POINTS_PATH: &str = "/rest/businesslocation/v5/servicepoints/byaddress.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostNordEnvironment {
    Sandbox,
    Production,
}

impl PostNordEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            PostNordEnvironment::Sandbox => "https://atapi2.postnord.com",
            PostNordEnvironment::Production => "https://api2.postnord.com",
        }
    }
}

impl FromStr for PostNordEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" | "test" | "development" => Ok(PostNordEnvironment::Sandbox),
            "production" | "prod" => Ok(PostNordEnvironment::Production),
            other => Err(format!("unknown PostNord environment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostNordConfig {
    pub api_key: Masked<String>,
    pub base_url: String,
    pub customer_number: String,
    pub timeout: Duration,
    pub locale: String,
}

impl PostNordConfig {
    pub fn new(api_key: impl Into<String>, environment: PostNordEnvironment) -> Self {
        Self {
            api_key: Masked::new(api_key.into()),
            base_url: environment.base_url().to_string(),
            customer_number: String::new(),
            timeout: Duration::from_secs(10),
            locale: "en".to_string(),
        }
    }
}

/// PostNord REST client. Built once at startup and shared behind an `Arc`.
pub struct PostNordClient {
    http: Client,
    config: PostNordConfig,
}

impl PostNordClient {
    pub fn new(config: PostNordConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Sends with the api key attached and returns the parsed JSON body of a
    /// 2xx response. Everything else becomes a `CarrierError`.
    async fn send(&self, request: RequestBuilder) -> Result<Value, CarrierError> {
        let response = request
            .query(&[("apikey", self.config.api_key.expose().as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CarrierError::Transient(format!("request timed out after {:?}", self.config.timeout))
                } else {
                    CarrierError::Transient(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CarrierError::Transient(e.without_url().to_string()))?;
        let body: Option<Value> = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        };

        if status.is_success() {
            return body.ok_or_else(|| CarrierError::Malformed {
                message: "empty response body".to_string(),
                payload: None,
            });
        }

        let message = body
            .as_ref()
            .and_then(fault_message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
        warn!("PostNord responded {}: {}", status, message);
        Err(CarrierError::Rejected {
            status: status.as_u16(),
            message,
            payload: body,
        })
    }
}

#[async_trait]
impl CarrierClient for PostNordClient {
    fn name(&self) -> &str {
        "PostNord"
    }

    async fn create_shipment(
        &self,
        request: &BookingRequest,
    ) -> Result<BookingConfirmation, BookingError> {
        let instruction =
            booking_instruction(request, &self.config.customer_number, chrono::Utc::now());
        debug!(
            "Booking PostNord parcel for {} with service {}",
            request.reference, request.service_code
        );

        let raw = self
            .send(self.http.post(self.url(BOOKING_PATH)).json(&instruction))
            .await
            .map_err(BookingError)?;
        let response: LabelResponse =
            serde_json::from_value(raw.clone()).map_err(|e| {
                BookingError(CarrierError::Malformed {
                    message: e.to_string(),
                    payload: Some(raw.clone()),
                })
            })?;
        let confirmation = response.into_confirmation(&raw).map_err(BookingError)?;

        info!(
            "PostNord booked {} as shipment {} (tracking {})",
            request.reference, confirmation.carrier_shipment_id, confirmation.tracking_number
        );
        Ok(confirmation)
    }

    async fn track_shipment(&self, tracking_number: &str) -> Result<TrackingReport, TrackingError> {
        let request = self.http.get(self.url(TRACKING_PATH)).query(&[
            ("id", tracking_number),
            ("locale", self.config.locale.as_str()),
        ]);

        let raw = match self.send(request).await {
            Ok(raw) => raw,
            Err(CarrierError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(TrackingError(CarrierError::NotFound(tracking_number.to_string())))
            }
            Err(e) => return Err(TrackingError(e)),
        };

        let envelope: TrackingEnvelope = serde_json::from_value(raw.clone()).map_err(|e| {
            TrackingError(CarrierError::Malformed {
                message: e.to_string(),
                payload: Some(raw.clone()),
            })
        })?;

        let shipment = envelope
            .response
            .shipments
            .into_iter()
            .next()
            .ok_or_else(|| TrackingError(CarrierError::NotFound(tracking_number.to_string())))?;

        let report = shipment.into_report();
        debug!(
            "PostNord tracking {}: {} with {} events",
            tracking_number,
            report.status,
            report.events.len()
        );
        Ok(report)
    }

    async fn find_service_points(
        &self,
        country_code: &str,
        postal_code: &str,
        city: &str,
    ) -> Result<Vec<ServicePoint>, CarrierError> {
        let postal_code = postal_code.replace(' ', "");
        let request = self.http.get(self.url(SERVICE_POINTS_PATH)).query(&[
            ("countryCode", country_code),
            ("postalCode", postal_code.as_str()),
            ("city", city),
            ("locale", self.config.locale.as_str()),
        ]);

        let raw = match self.send(request).await {
            Ok(raw) => raw,
            Err(CarrierError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };

        let envelope: ServicePointEnvelope =
            serde_json::from_value(raw.clone()).map_err(|e| CarrierError::Malformed {
                message: e.to_string(),
                payload: Some(raw),
            })?;

        Ok(envelope
            .response
            .service_points
            .into_iter()
            .map(|p| p.into_service_point(country_code))
            .collect())
    }
}
