use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use loppis_api::{app, middleware::Claims, state::AuthConfig, AppState};
use loppis_core::{BookingError, CarrierError, Role, ServicePoint, ShipmentStatus};
use loppis_order::testing::{
    carrier_event, confirmation, paid_order, seller_address, tracking_report,
    InMemoryFulfillmentRepository, InMemoryNotificationRepository, ScriptedCarrier,
};
use loppis_order::{OrderStatus, ShipmentOrchestrator, TrackingSynchronizer};
use loppis_store::app_config::RateLimitConfig;
use loppis_store::RedisClient;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

const SECRET: &str = "test-secret";

struct Harness {
    app: Router,
    repo: Arc<InMemoryFulfillmentRepository>,
    carrier: Arc<ScriptedCarrier>,
}

async fn harness() -> Harness {
    harness_with_redis(None).await
}

async fn harness_with_redis(redis: Option<Arc<RedisClient>>) -> Harness {
    let repo = Arc::new(InMemoryFulfillmentRepository::new());
    repo.insert_order(paid_order("ord_1", "usr_buyer", "usr_seller")).await;
    let carrier = Arc::new(ScriptedCarrier::new());
    let (events_tx, _) = broadcast::channel(16);

    let orchestrator = ShipmentOrchestrator::new(carrier.clone(), repo.clone())
        .with_default_sender(seller_address())
        .with_events(events_tx.clone());
    let synchronizer = TrackingSynchronizer::new(carrier.clone(), repo.clone()).with_events(events_tx.clone());

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        synchronizer: Arc::new(synchronizer),
        notifications: Arc::new(InMemoryNotificationRepository::new()),
        db: None,
        redis,
        events_tx,
        auth: AuthConfig {
            secret: SECRET.to_string(),
        },
        rate_limit: RateLimitConfig::default(),
    };

    Harness {
        app: app(state),
        repo,
        carrier,
    }
}

fn token(user_id: &str, role: Role) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn seller() -> String {
    token("usr_seller", Role::Seller)
}

fn buyer() -> String {
    token("usr_buyer", Role::Buyer)
}

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn create_body(order_id: &str) -> Value {
    json!({ "orderId": order_id, "weight": 1.2, "length": 30.0, "width": 20.0, "height": 10.0 })
}

#[tokio::test]
async fn test_health_is_public() {
    let h = harness().await;
    let (status, body) = send(&h.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "disabled");
    assert_eq!(body["redis"], "disabled");
}

#[tokio::test]
async fn test_health_reports_unreachable_redis() {
    // nothing listens on port 1
    let redis = RedisClient::new("redis://127.0.0.1:1/").await.unwrap();
    let h = harness_with_redis(Some(Arc::new(redis))).await;

    let (status, body) = send(&h.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["redis"], "unavailable");
    assert_eq!(body["database"], "disabled");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let h = harness().await;
    let (status, _) = send(&h.app, Method::POST, "/shipments", None, Some(create_body("ord_1"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.app, Method::POST, "/shipments", Some("not-a-jwt"), Some(create_body("ord_1"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.carrier.booking_calls(), 0);
}

#[tokio::test]
async fn test_buyer_cannot_create_shipment() {
    let h = harness().await;
    let (status, body) = send(&h.app, Method::POST, "/shipments", Some(&buyer()), Some(create_body("ord_1"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());
    assert_eq!(h.carrier.booking_calls(), 0);
}

#[tokio::test]
async fn test_seller_creates_shipment() {
    let h = harness().await;
    h.carrier.push_booking(Ok(confirmation("pn_77", "00370712345678901"))).await;

    let (status, body) = send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(create_body("ord_1"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["shipment"]["trackingNumber"], "00370712345678901");
    assert_eq!(body["shipment"]["labelUrl"], "https://labels.example/00370712345678901.pdf");
    assert!(body["shipment"]["id"].is_string());

    let order = h.repo.order("ord_1").await.unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(h.repo.shipment_count().await, 1);

    let booked = h.carrier.last_booking().await.unwrap();
    assert_eq!(booked.reference, "ord_1");
    assert_eq!(booked.service_code, "17");
    assert_eq!(booked.recipient.postal_code, "111 51");
}

#[tokio::test]
async fn test_second_create_conflicts() {
    let h = harness().await;
    let (first, _) = send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(create_body("ord_1"))).await;
    assert_eq!(first, StatusCode::CREATED);

    let (second, _) = send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(create_body("ord_1"))).await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(h.carrier.booking_calls(), 1);
}

#[tokio::test]
async fn test_invalid_create_requests_are_rejected() {
    let h = harness().await;

    let (status, _) = send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(json!({ "orderId": "ord_1" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.app,
        Method::POST,
        "/shipments",
        Some(&seller()),
        Some(json!({ "orderId": "ord_1", "weight": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.app,
        Method::POST,
        "/shipments",
        Some(&seller()),
        Some(json!({
            "orderId": "ord_1",
            "weight": 1.0,
            "senderInfo": { "name": "Seller", "street": "", "city": "Malmö", "postalCode": "211 20", "countryCode": "SE" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut order = paid_order("ord_2", "usr_buyer", "usr_seller");
    order.shipping.city = None;
    h.repo.insert_order(order).await;
    let (status, _) = send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(create_body("ord_2"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.carrier.booking_calls(), 0);
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let h = harness().await;
    let (status, _) = send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(create_body("ord_missing"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_carrier_rejection_surfaces_payload() {
    let h = harness().await;
    h.carrier
        .push_booking(Err(BookingError(CarrierError::Rejected {
            status: 400,
            message: "Invalid postal code".to_string(),
            payload: Some(json!({ "message": "Invalid postal code", "fieldName": "postalCode" })),
        })))
        .await;

    let (status, body) = send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(create_body("ord_1"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["details"]["fieldName"], "postalCode");
    assert_eq!(body["retryable"], true);

    assert_eq!(h.repo.shipment_count().await, 0);
    assert_eq!(h.repo.order("ord_1").await.unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_list_shipments_for_order() {
    let h = harness().await;
    send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(create_body("ord_1"))).await;

    let (status, body) = send(&h.app, Method::GET, "/shipments?orderId=ord_1", Some(&buyer()), None).await;
    assert_eq!(status, StatusCode::OK);
    let shipments = body["shipments"].as_array().unwrap();
    assert_eq!(shipments.len(), 1);
    assert_eq!(shipments[0]["status"], "PENDING");
    assert_eq!(shipments[0]["orderId"], "ord_1");

    let (status, _) = send(&h.app, Method::GET, "/shipments", Some(&buyer()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.app,
        Method::GET,
        "/shipments?orderId=ord_1",
        Some(&token("usr_stranger", Role::Buyer)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_sync_then_confirm_delivery() {
    let h = harness().await;
    let (_, created) = send(&h.app, Method::POST, "/shipments", Some(&seller()), Some(create_body("ord_1"))).await;
    let shipment_id = created["shipment"]["id"].as_str().unwrap().to_string();

    let picked_up = Utc::now() - Duration::hours(5);
    h.carrier
        .set_tracking(Ok(tracking_report(
            ShipmentStatus::InTransit,
            vec![carrier_event("EVENT_PICKED_UP", picked_up)],
        )))
        .await;

    let uri = format!("/shipments/{}/sync", shipment_id);
    let (status, body) = send(&h.app, Method::POST, &uri, Some(&seller()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newEvents"], 1);
    assert_eq!(body["statusChanged"], true);
    assert_eq!(body["orderDelivered"], false);
    assert_eq!(body["shipment"]["status"], "IN_TRANSIT");

    let (status, _) = send(&h.app, Method::POST, "/orders/ord_1/confirm-delivery", Some(&seller()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&h.app, Method::POST, "/orders/ord_1/confirm-delivery", Some(&buyer()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "DELIVERED");

    // Idempotent
    let (status, _) = send(&h.app, Method::POST, "/orders/ord_1/confirm-delivery", Some(&buyer()), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_sync_unknown_shipment_is_not_found() {
    let h = harness().await;
    let (status, _) = send(&h.app, Method::POST, "/shipments/shp_missing/sync", Some(&seller()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_unshipped_order_conflicts() {
    let h = harness().await;
    let (status, _) = send(&h.app, Method::POST, "/orders/ord_1/confirm-delivery", Some(&buyer()), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_service_points() {
    let h = harness().await;
    h.carrier
        .set_service_points(vec![ServicePoint {
            id: "SE-1234".to_string(),
            name: "ICA Supermarket".to_string(),
            street: Some("Sveavägen 5".to_string()),
            postal_code: Some("11157".to_string()),
            city: Some("Stockholm".to_string()),
            country_code: "SE".to_string(),
            distance_meters: Some(250),
        }])
        .await;

    let (status, body) = send(
        &h.app,
        Method::GET,
        "/service-points?countryCode=SE&postalCode=11151&city=Stockholm",
        Some(&buyer()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["servicePoints"][0]["id"], "SE-1234");

    let (status, _) = send(&h.app, Method::GET, "/service-points?countryCode=SE", Some(&buyer()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.carrier.service_point_calls(), 1);
}

#[tokio::test]
async fn test_notifications_list_is_empty_for_new_user() {
    let h = harness().await;
    let (status, body) = send(&h.app, Method::GET, "/notifications?limit=10", Some(&buyer()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notifications"], json!([]));
}
