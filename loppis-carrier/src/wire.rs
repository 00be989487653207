//! PostNord request/response shapes and their translation to and from the
//! carrier-neutral types in `loppis_core`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use loppis_core::{
    Address, BookingConfirmation, BookingRequest, CarrierError, CarrierEvent, LabelDocument,
    ServicePoint, ShipmentStatus, TrackingReport,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

// ============================================================================
// Booking (EDI instruction)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdiInstruction {
    pub message_date: String,
    pub message_function: &'static str,
    pub message_id: String,
    pub application: Application,
    pub update_indicator: &'static str,
    pub shipment: Vec<EdiShipment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub application_id: u32,
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdiShipment {
    pub shipment_identification: ShipmentIdentification,
    pub date_and_times: DateAndTimes,
    pub service: Service,
    pub number_of_packages: Quantity,
    pub total_gross_weight: Measure,
    pub references: Vec<Reference>,
    pub parties: Parties,
    pub goods_item: Vec<GoodsItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentIdentification {
    pub shipment_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateAndTimes {
    pub loading_date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub basic_service_code: String,
}

#[derive(Debug, Serialize)]
pub struct Quantity {
    pub value: u32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Measure {
    pub value: f64,
    pub unit: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub reference_no: String,
    pub reference_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Parties {
    pub consignor: Party,
    pub consignee: Party,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_identification: Option<PartyIdentification>,
    pub party: PartyDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyIdentification {
    pub party_id: String,
    pub party_id_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyDetails {
    pub name_identification: NameIdentification,
    pub address: EdiAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
}

#[derive(Debug, Serialize)]
pub struct NameIdentification {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdiAddress {
    pub streets: Vec<String>,
    pub postal_code: String,
    pub city: String,
    pub country_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub contact_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_no: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoodsItem {
    pub package_type_code: &'static str,
    pub items: Vec<Item>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub item_identification: ItemIdentification,
    pub gross_weight: Measure,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemIdentification {
    pub item_id: String,
}

#[derive(Debug, Serialize)]
pub struct Dimensions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<Measure>,
}

fn party(address: &Address, customer_number: Option<&str>) -> Party {
    let contact = Contact {
        contact_name: address.name.clone(),
        email_address: address.email.as_ref().map(|e| e.expose().clone()),
        sms_no: address.phone.as_ref().map(|p| p.expose().clone()),
    };
    Party {
        issuer_code: customer_number.map(|_| "Z12"),
        party_identification: customer_number.map(|id| PartyIdentification {
            party_id: id.to_string(),
            party_id_type: "160",
        }),
        party: PartyDetails {
            name_identification: NameIdentification {
                name: address.name.clone(),
            },
            address: EdiAddress {
                streets: vec![address.street.clone()],
                postal_code: address.postal_code.replace(' ', ""),
                city: address.city.clone(),
                country_code: address.country_code.clone(),
            },
            contact: Some(contact),
        },
    }
}

fn cm(value: Option<f64>) -> Option<Measure> {
    value.map(|v| Measure { value: v, unit: "CMT" })
}

/// Builds the single-parcel EDI instruction for a booking.
pub fn booking_instruction(
    request: &BookingRequest,
    customer_number: &str,
    now: DateTime<Utc>,
) -> EdiInstruction {
    let parcel = &request.parcel;
    let dimensions = if parcel.length_cm.is_some()
        || parcel.width_cm.is_some()
        || parcel.height_cm.is_some()
    {
        Some(Dimensions {
            height: cm(parcel.height_cm),
            width: cm(parcel.width_cm),
            length: cm(parcel.length_cm),
        })
    } else {
        None
    };

    EdiInstruction {
        message_date: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        message_function: "Instruction",
        message_id: uuid::Uuid::new_v4().to_string(),
        application: Application {
            application_id: 1438,
            name: "Loppis",
            version: "1.0",
        },
        update_indicator: "Original",
        shipment: vec![EdiShipment {
            shipment_identification: ShipmentIdentification {
                shipment_id: "0".to_string(),
            },
            date_and_times: DateAndTimes {
                loading_date: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            },
            service: Service {
                basic_service_code: request.service_code.clone(),
            },
            number_of_packages: Quantity { value: 1 },
            total_gross_weight: Measure {
                value: parcel.weight_kg,
                unit: "KGM",
            },
            references: vec![Reference {
                reference_no: request.reference.clone(),
                reference_type: "CU",
            }],
            parties: Parties {
                consignor: party(&request.sender, Some(customer_number)),
                consignee: party(&request.recipient, None),
            },
            goods_item: vec![GoodsItem {
                package_type_code: "PC",
                items: vec![Item {
                    item_identification: ItemIdentification {
                        item_id: "0".to_string(),
                    },
                    gross_weight: Measure {
                        value: parcel.weight_kg,
                        unit: "KGM",
                    },
                    dimensions,
                }],
            }],
        }],
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelResponse {
    pub booking_response: BookingResponseBody,
    #[serde(default)]
    pub label_printout: Vec<LabelPrintout>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponseBody {
    pub booking_id: Option<String>,
    #[serde(default)]
    pub id_information: Vec<IdInformation>,
    pub estimated_time_of_arrival: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdInformation {
    #[serde(default)]
    pub ids: Vec<IdEntry>,
    #[serde(default)]
    pub urls: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdEntry {
    pub id_type: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct UrlEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelPrintout {
    pub printout: Printout,
}

#[derive(Debug, Deserialize)]
pub struct Printout {
    pub data: Option<String>,
    pub encoding: Option<String>,
}

impl LabelResponse {
    fn id_of(&self, id_type: &str) -> Option<String> {
        self.booking_response
            .id_information
            .iter()
            .flat_map(|info| info.ids.iter())
            .find(|id| id.id_type.eq_ignore_ascii_case(id_type))
            .map(|id| id.value.clone())
    }

    fn label(&self) -> Option<LabelDocument> {
        let pdf = self
            .label_printout
            .iter()
            .filter(|p| {
                p.printout
                    .encoding
                    .as_deref()
                    .map_or(true, |e| e.eq_ignore_ascii_case("base64"))
            })
            .find_map(|p| p.printout.data.clone());
        if let Some(base64) = pdf {
            return Some(LabelDocument::Pdf { base64 });
        }
        self.booking_response
            .id_information
            .iter()
            .flat_map(|info| info.urls.iter())
            .find(|u| u.kind.eq_ignore_ascii_case("LABEL"))
            .map(|u| LabelDocument::Url { url: u.url.clone() })
    }

    pub fn into_confirmation(self, raw: &Value) -> Result<BookingConfirmation, CarrierError> {
        let item_id = self.id_of("itemId");
        let shipment_id = self
            .id_of("shipmentId")
            .or_else(|| self.booking_response.booking_id.clone());

        let (tracking_number, carrier_shipment_id) = match (item_id, shipment_id) {
            (Some(item), Some(shipment)) => (item, shipment),
            (Some(item), None) => (item.clone(), item),
            (None, Some(shipment)) => (shipment.clone(), shipment),
            (None, None) => {
                return Err(CarrierError::Malformed {
                    message: "booking response carries no shipment or item id".to_string(),
                    payload: Some(raw.clone()),
                })
            }
        };

        Ok(BookingConfirmation {
            carrier_shipment_id,
            tracking_number,
            label: self.label(),
            estimated_delivery: self
                .booking_response
                .estimated_time_of_arrival
                .as_deref()
                .and_then(parse_carrier_time),
        })
    }
}

// ============================================================================
// Track & trace
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TrackingEnvelope {
    #[serde(rename = "TrackingInformationResponse")]
    pub response: TrackingInformation,
}

#[derive(Debug, Deserialize)]
pub struct TrackingInformation {
    #[serde(default)]
    pub shipments: Vec<TrackedShipment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedShipment {
    pub shipment_id: Option<String>,
    pub status: String,
    pub status_text: Option<StatusText>,
    pub delivery_date: Option<String>,
    pub estimated_time_of_arrival: Option<String>,
    #[serde(default)]
    pub items: Vec<TrackedItem>,
}

#[derive(Debug, Deserialize)]
pub struct StatusText {
    pub header: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    pub item_id: Option<String>,
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub events: Vec<TrackedEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    pub event_time: String,
    pub event_code: Option<String>,
    pub status: Option<String>,
    pub event_description: Option<String>,
    pub location: Option<EventLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLocation {
    pub display_name: Option<String>,
    pub name: Option<String>,
}

/// PostNord shipment status -> marketplace status.
///
/// STOPPED means PostNord halted the parcel for good (sender recall, customs
/// stop); nothing further happens to it, so it lands on the terminal
/// CANCELLED rather than staying in transit. RETURNED is taken as reported
/// even without a prior failed delivery: refused or unclaimed parcels go back
/// straight from a pickup point.
pub fn map_status(status: &str) -> ShipmentStatus {
    match status.to_ascii_uppercase().as_str() {
        "CREATED" | "INFORMED" => ShipmentStatus::Pending,
        "AVAILABLE_FOR_DELIVERY" => ShipmentStatus::OutForDelivery,
        "DELIVERED" => ShipmentStatus::Delivered,
        "DELIVERY_IMPOSSIBLE" | "DELIVERY_REFUSED" => ShipmentStatus::FailedDelivery,
        "RETURNED" => ShipmentStatus::Returned,
        "STOPPED" => ShipmentStatus::Cancelled,
        // EN_ROUTE, DELAYED, EXPECTED_DELAY, SPLIT, OTHER
        _ => ShipmentStatus::InTransit,
    }
}

/// Accepts RFC 3339, offset-less local timestamps (read as UTC) and bare dates.
/// Truncated to microseconds, the precision Postgres stores, so a stored event
/// compares equal to the same event in a later report.
pub fn parse_carrier_time(raw: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(raw).map(|ts| ts.trunc_subsecs(6))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl TrackedShipment {
    pub fn into_report(self) -> TrackingReport {
        let status = map_status(&self.status);
        let status_description = self
            .status_text
            .as_ref()
            .and_then(|t| t.header.clone().or_else(|| t.body.clone()))
            .unwrap_or_else(|| self.status.clone());

        let mut seen = HashSet::new();
        let mut events: Vec<CarrierEvent> = Vec::new();
        for event in self.items.iter().flat_map(|item| item.events.iter()) {
            let Some(occurred_at) = parse_carrier_time(&event.event_time) else {
                tracing::warn!("Skipping carrier event with unreadable time '{}'", event.event_time);
                continue;
            };
            let status_code = event
                .event_code
                .clone()
                .or_else(|| event.status.clone())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            if !seen.insert((occurred_at, status_code.clone())) {
                continue;
            }
            events.push(CarrierEvent {
                description: event
                    .event_description
                    .clone()
                    .unwrap_or_else(|| status_code.clone()),
                status_code,
                location: event
                    .location
                    .as_ref()
                    .and_then(|l| l.display_name.clone().or_else(|| l.name.clone())),
                occurred_at,
            });
        }
        events.sort_by_key(|e| e.occurred_at);

        let reported_delivery = self
            .delivery_date
            .as_deref()
            .or_else(|| self.items.iter().find_map(|i| i.delivery_date.as_deref()))
            .and_then(parse_carrier_time);
        let actual_delivery = match (reported_delivery, status) {
            (Some(ts), _) => Some(ts),
            (None, ShipmentStatus::Delivered) => events.last().map(|e| e.occurred_at),
            _ => None,
        };

        TrackingReport {
            status,
            status_description,
            estimated_delivery: self
                .estimated_time_of_arrival
                .as_deref()
                .and_then(parse_carrier_time),
            actual_delivery,
            events,
        }
    }
}

// ============================================================================
// Service points
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServicePointEnvelope {
    #[serde(rename = "servicePointInformationResponse")]
    pub response: ServicePointInformation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePointInformation {
    #[serde(default)]
    pub service_points: Vec<WireServicePoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireServicePoint {
    pub service_point_id: String,
    pub name: String,
    pub visiting_address: Option<VisitingAddress>,
    pub route_distance: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitingAddress {
    pub street_name: Option<String>,
    pub street_number: Option<String>,
    pub postal_code: Option<String>,
    pub city_name: Option<String>,
    pub country_code: Option<String>,
}

impl WireServicePoint {
    pub fn into_service_point(self, fallback_country: &str) -> ServicePoint {
        let address = self.visiting_address;
        let street = address.as_ref().and_then(|a| match (&a.street_name, &a.street_number) {
            (Some(name), Some(number)) => Some(format!("{} {}", name, number)),
            (Some(name), None) => Some(name.clone()),
            _ => None,
        });
        ServicePoint {
            id: self.service_point_id,
            name: self.name,
            street,
            postal_code: address.as_ref().and_then(|a| a.postal_code.clone()),
            city: address.as_ref().and_then(|a| a.city_name.clone()),
            country_code: address
                .as_ref()
                .and_then(|a| a.country_code.clone())
                .unwrap_or_else(|| fallback_country.to_string()),
            distance_meters: self.route_distance,
        }
    }
}

/// Best human-readable message in a PostNord error body.
pub fn fault_message(body: &Value) -> Option<String> {
    if let Some(faults) = body
        .pointer("/compositeFault/faults")
        .and_then(Value::as_array)
    {
        let texts: Vec<&str> = faults
            .iter()
            .filter_map(|f| f.get("explanationText").and_then(Value::as_str))
            .collect();
        if !texts.is_empty() {
            return Some(texts.join("; "));
        }
    }
    body.get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use loppis_core::Parcel;
    use loppis_shared::Masked;
    use serde_json::json;

    fn address(name: &str, city: &str) -> Address {
        Address {
            name: name.to_string(),
            street: "Storgatan 2".to_string(),
            city: city.to_string(),
            postal_code: "411 38".to_string(),
            country_code: "SE".to_string(),
            phone: Some(Masked::from("+46700000000")),
            email: None,
        }
    }

    #[test]
    fn test_booking_instruction_shape() {
        let request = BookingRequest {
            sender: address("Seller AB", "Göteborg"),
            recipient: address("Anna Andersson", "Stockholm"),
            parcel: Parcel {
                weight_kg: 1.2,
                length_cm: Some(30.0),
                width_cm: None,
                height_cm: Some(10.0),
            },
            service_code: "17".to_string(),
            reference: "ord_1".to_string(),
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let body = serde_json::to_value(booking_instruction(&request, "1234567890", now)).unwrap();

        let shipment = &body["shipment"][0];
        assert_eq!(shipment["service"]["basicServiceCode"], "17");
        assert_eq!(shipment["totalGrossWeight"], json!({"value": 1.2, "unit": "KGM"}));
        assert_eq!(shipment["references"][0]["referenceNo"], "ord_1");
        assert_eq!(
            shipment["parties"]["consignor"]["partyIdentification"]["partyId"],
            "1234567890"
        );
        assert!(shipment["parties"]["consignee"].get("partyIdentification").is_none());
        assert_eq!(shipment["parties"]["consignee"]["party"]["address"]["postalCode"], "41138");
        assert_eq!(
            shipment["parties"]["consignee"]["party"]["contact"]["smsNo"],
            "+46700000000"
        );
        let dims = &shipment["goodsItem"][0]["items"][0]["dimensions"];
        assert_eq!(dims["length"]["value"], 30.0);
        assert!(dims.get("width").is_none());
        assert_eq!(body["messageDate"], "2024-03-01T09:00:00Z");
    }

    #[test]
    fn test_label_response_into_confirmation() {
        let raw = json!({
            "bookingResponse": {
                "bookingId": "booking-1",
                "idInformation": [{
                    "ids": [
                        {"idType": "itemId", "value": "TRK123"},
                        {"idType": "shipmentId", "value": "pn_99"}
                    ],
                    "urls": []
                }],
                "estimatedTimeOfArrival": "2024-03-04T16:00:00"
            },
            "labelPrintout": [{"printout": {"encoding": "base64", "data": "JVBERi0="}}]
        });
        let response: LabelResponse = serde_json::from_value(raw.clone()).unwrap();
        let confirmation = response.into_confirmation(&raw).unwrap();

        assert_eq!(confirmation.tracking_number, "TRK123");
        assert_eq!(confirmation.carrier_shipment_id, "pn_99");
        assert_eq!(
            confirmation.label,
            Some(LabelDocument::Pdf { base64: "JVBERi0=".to_string() })
        );
        assert_eq!(
            confirmation.estimated_delivery,
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_label_response_without_ids_is_malformed() {
        let raw = json!({"bookingResponse": {"idInformation": []}});
        let response: LabelResponse = serde_json::from_value(raw.clone()).unwrap();
        let err = response.into_confirmation(&raw).unwrap_err();
        assert!(matches!(err, CarrierError::Malformed { .. }));
        assert_eq!(err.payload(), Some(&raw));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("CREATED"), ShipmentStatus::Pending);
        assert_eq!(map_status("EN_ROUTE"), ShipmentStatus::InTransit);
        assert_eq!(map_status("delayed"), ShipmentStatus::InTransit);
        assert_eq!(map_status("AVAILABLE_FOR_DELIVERY"), ShipmentStatus::OutForDelivery);
        assert_eq!(map_status("DELIVERED"), ShipmentStatus::Delivered);
        assert_eq!(map_status("DELIVERY_REFUSED"), ShipmentStatus::FailedDelivery);
        assert_eq!(map_status("RETURNED"), ShipmentStatus::Returned);
        assert_eq!(map_status("STOPPED"), ShipmentStatus::Cancelled);
    }

    #[test]
    fn test_parse_carrier_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(parse_carrier_time("2024-03-01T10:15:00"), Some(expected));
        assert_eq!(parse_carrier_time("2024-03-01T11:15:00+01:00"), Some(expected));
        assert_eq!(parse_carrier_time("2024-03-01T10:15"), Some(expected));
        assert_eq!(
            parse_carrier_time("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_carrier_time("yesterday"), None);

        let precise = parse_carrier_time("2024-03-01T10:15:00.123456789Z").unwrap();
        assert_eq!(precise.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(parse_carrier_time("2024-03-01T10:15:00.123456"), Some(precise));
    }

    #[test]
    fn test_tracked_shipment_into_report() {
        let shipment: TrackedShipment = serde_json::from_value(json!({
            "shipmentId": "pn_99",
            "status": "DELIVERED",
            "statusText": {"header": "The shipment has been delivered"},
            "items": [
                {"itemId": "TRK123", "events": [
                    {"eventTime": "2024-03-02T08:00:00", "eventCode": "DELIVERED",
                     "eventDescription": "Delivered", "location": {"displayName": "Stockholm"}},
                    {"eventTime": "2024-03-01T10:15:00", "eventCode": "EN_ROUTE",
                     "eventDescription": "Arrived at sorting facility", "location": {"name": "Göteborg"}},
                    {"eventTime": "2024-03-01T10:15:00", "eventCode": "EN_ROUTE",
                     "eventDescription": "Arrived at sorting facility"},
                    {"eventTime": "not a time", "eventCode": "OTHER"}
                ]}
            ]
        }))
        .unwrap();

        let report = shipment.into_report();
        assert_eq!(report.status, ShipmentStatus::Delivered);
        assert_eq!(report.status_description, "The shipment has been delivered");
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.events[0].status_code, "EN_ROUTE");
        assert_eq!(report.events[0].location.as_deref(), Some("Göteborg"));
        assert_eq!(report.events[1].status_code, "DELIVERED");
        assert_eq!(
            report.actual_delivery,
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_fault_message() {
        let body = json!({"compositeFault": {"faults": [
            {"faultCode": "E1", "explanationText": "Invalid postal code"},
            {"faultCode": "E2", "explanationText": "Weight exceeds limit"}
        ]}});
        assert_eq!(
            fault_message(&body).as_deref(),
            Some("Invalid postal code; Weight exceeds limit")
        );
        assert_eq!(fault_message(&json!({"message": "Unauthorized"})).as_deref(), Some("Unauthorized"));
        assert_eq!(fault_message(&json!({})), None);
    }
}
