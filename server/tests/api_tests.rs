//! HTTP-level tests: the router over in-memory doubles.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::unwrap_used)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::Duration;
use raffle_core::config::{ReservationConfig, SweeperConfig};
use raffle_core::environment::Clock;
use raffle_core::types::{PurchaseStatus, TicketStatus};
use raffle_server::signature;
use raffle_server::state::Security;
use raffle_server::{AppState, build_router};
use raffle_testing::fixtures::{BUYER, CREATOR, Harness};
use serde_json::{Value, json};
use std::sync::Arc;

const OPERATOR_TOKEN: &str = "operator-secret";
const WEBHOOK_SECRET: &str = "whsec_test";

fn server(h: &Harness, security: Security) -> TestServer {
    let state = AppState::new(
        Arc::new(h.store.clone()),
        Arc::new(h.gateway.clone()),
        Arc::new(h.notifier.clone()),
        Arc::new(h.clock.clone()),
        ReservationConfig::default(),
        SweeperConfig::default(),
        security,
    );
    TestServer::new(build_router(state)).expect("test server")
}

fn open_server(h: &Harness) -> TestServer {
    server(
        h,
        Security {
            webhook_secret: None,
            operator_token: Some(OPERATOR_TOKEN.to_string()),
        },
    )
}

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        axum::http::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    )
}

fn payment_body(id: &str) -> Value {
    json!({ "type": "payment", "data": { "id": id } })
}

/// Test 1: checkout holds the numbers and returns the redirect.
#[tokio::test]
async fn test_checkout_created() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    let server = open_server(&h);

    let response = server
        .post("/api/checkout")
        .json(&json!({ "raffle_id": raffle.id, "numbers": [7, 3], "buyer_email": BUYER }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["numbers"], json!([3, 7]));
    assert_eq!(body["amount_cents"], json!(500));
    assert_eq!(body["amount"], json!("5.00"));
    assert!(body["redirect_url"].as_str().is_some_and(|u| !u.is_empty()));
    assert_eq!(h.store.ticket(raffle.id, 3).expect("ticket").status, TicketStatus::Pending);
}

/// Test 2: taken numbers answer 409 with the conflicting numbers.
#[tokio::test]
async fn test_checkout_conflict() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    h.reserve(raffle.id, vec![5]).await.expect("reserve");
    let server = open_server(&h);

    let response = server
        .post("/api/checkout")
        .json(&json!({ "raffle_id": raffle.id, "numbers": [4, 5], "buyer_email": BUYER }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("tickets_not_available"));
    assert_eq!(body["details"]["numbers"], json!([5]));
    assert_eq!(h.store.ticket(raffle.id, 4).expect("ticket").status, TicketStatus::Available);
}

/// Test 3: unknown raffles, bad input and malformed bodies.
#[tokio::test]
async fn test_checkout_rejections() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    let server = open_server(&h);

    let unknown = server
        .post("/api/checkout")
        .json(&json!({
            "raffle_id": "00000000-0000-4000-8000-000000000000",
            "numbers": [1],
            "buyer_email": BUYER
        }))
        .await;
    unknown.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(unknown.json::<Value>()["code"], json!("raffle_not_found"));

    let empty = server
        .post("/api/checkout")
        .json(&json!({ "raffle_id": raffle.id, "numbers": [], "buyer_email": BUYER }))
        .await;
    empty.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(empty.json::<Value>()["code"], json!("validation_error"));

    let malformed = server
        .post("/api/checkout")
        .json(&json!({ "raffle_id": raffle.id, "numbers": "seven" }))
        .await;
    malformed.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

/// Test 4: a gateway failure answers 502 and leaves nothing held.
#[tokio::test]
async fn test_checkout_gateway_failure() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    h.gateway
        .fail_preferences_with(raffle_core::gateway::GatewayError::Timeout);
    let server = open_server(&h);

    let response = server
        .post("/api/checkout")
        .json(&json!({ "raffle_id": raffle.id, "numbers": [1], "buyer_email": BUYER }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["code"], json!("gateway_error"));
    assert_eq!(h.store.ticket(raffle.id, 1).expect("ticket").status, TicketStatus::Available);
}

/// Test 5: an approval webhook sells the tickets; redelivery changes nothing.
#[tokio::test]
async fn test_webhook_processed_once() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    let reservation = h.reserve(raffle.id, vec![2]).await.expect("reserve");
    h.gateway.approve("pay-1", reservation.purchase_id);
    let server = open_server(&h);

    let first = server.post("/api/webhooks/payments").json(&payment_body("pay-1")).await;
    first.assert_status_ok();
    let body: Value = first.json();
    assert_eq!(body["status"], json!("processed"));
    assert_eq!(body["result"]["outcome"], json!("applied"));

    let second = server.post("/api/webhooks/payments").json(&payment_body("pay-1")).await;
    second.assert_status_ok();
    assert_eq!(second.json::<Value>()["result"]["outcome"], json!("already_applied"));

    assert_eq!(h.store.ticket(raffle.id, 2).expect("ticket").status, TicketStatus::Sold);
    assert_eq!(h.notifier.count_to(BUYER), 1);
    assert_eq!(h.notifier.count_to(CREATOR), 1);
}

/// Test 6: the query-string forms are accepted.
#[tokio::test]
async fn test_webhook_query_form() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    let reservation = h.reserve(raffle.id, vec![9]).await.expect("reserve");
    h.gateway.reject("pay-9", reservation.purchase_id);
    let server = open_server(&h);

    let response = server
        .post("/api/webhooks/payments")
        .add_query_param("topic", "payment")
        .add_query_param("id", "pay-9")
        .await;

    response.assert_status_ok();
    assert_eq!(
        h.store.purchase(reservation.purchase_id).expect("purchase").status,
        PurchaseStatus::Rejected
    );
    assert_eq!(h.store.ticket(raffle.id, 9).expect("ticket").status, TicketStatus::Available);
}

/// Test 7: a gateway outage defers the notification and still answers 200.
#[tokio::test]
async fn test_webhook_deferred() {
    let h = Harness::new();
    h.gateway
        .fail_payments_with(raffle_core::gateway::GatewayError::Timeout);
    let server = open_server(&h);

    let response = server.post("/api/webhooks/payments").json(&payment_body("pay-5")).await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], json!("deferred"));
    assert!(h.store.payment_record("pay-5").is_some());
}

/// Test 8: when the notification cannot even be recorded, the gateway is
/// asked to redeliver.
#[tokio::test]
async fn test_webhook_unrecorded_is_error() {
    let h = Harness::new();
    h.gateway
        .fail_payments_with(raffle_core::gateway::GatewayError::Timeout);
    h.store.set_offline(true);
    let server = open_server(&h);

    let response = server.post("/api/webhooks/payments").json(&payment_body("pay-5")).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

/// Test 9: other topics are acknowledged and ignored; a payment without an id
/// is a bad request.
#[tokio::test]
async fn test_webhook_ignored_and_invalid() {
    let h = Harness::new();
    let server = open_server(&h);

    let ignored = server
        .post("/api/webhooks/payments")
        .json(&json!({ "type": "merchant_order", "data": { "id": "77" } }))
        .await;
    ignored.assert_status_ok();
    assert_eq!(ignored.json::<Value>()["status"], json!("ignored"));
    assert_eq!(h.gateway.payment_fetches(), 0);

    let missing = server
        .post("/api/webhooks/payments")
        .json(&json!({ "type": "payment", "data": {} }))
        .await;
    missing.assert_status(StatusCode::BAD_REQUEST);
}

/// Test 10: with a secret configured, only signed notifications are processed.
#[tokio::test]
async fn test_webhook_signature() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    let reservation = h.reserve(raffle.id, vec![1]).await.expect("reserve");
    h.gateway.approve("pay-1", reservation.purchase_id);
    let server = server(
        &h,
        Security {
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            operator_token: None,
        },
    );

    let unsigned = server.post("/api/webhooks/payments").json(&payment_body("pay-1")).await;
    unsigned.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(h.store.ticket(raffle.id, 1).expect("ticket").status, TicketStatus::Pending);

    let now = h.clock.now().timestamp();
    let forged = signature::sign("wrong", "pay-1", "req-1", now).expect("sign");
    let response = server
        .post("/api/webhooks/payments")
        .add_header(
            HeaderName::from_static("x-signature"),
            HeaderValue::from_str(&forged).unwrap(),
        )
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("req-1"),
        )
        .json(&payment_body("pay-1"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    // Correctly signed, but captured long ago.
    let replayed = signature::sign(
        WEBHOOK_SECRET,
        "pay-1",
        "req-1",
        now - signature::TOLERANCE_SECS - 60,
    )
    .expect("sign");
    let response = server
        .post("/api/webhooks/payments")
        .add_header(
            HeaderName::from_static("x-signature"),
            HeaderValue::from_str(&replayed).unwrap(),
        )
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("req-1"),
        )
        .json(&payment_body("pay-1"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(h.store.ticket(raffle.id, 1).expect("ticket").status, TicketStatus::Pending);

    let signed = signature::sign(WEBHOOK_SECRET, "pay-1", "req-1", now).expect("sign");
    let response = server
        .post("/api/webhooks/payments")
        .add_header(
            HeaderName::from_static("x-signature"),
            HeaderValue::from_str(&signed).unwrap(),
        )
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("req-1"),
        )
        .json(&payment_body("pay-1"))
        .await;
    response.assert_status_ok();
    assert_eq!(h.store.ticket(raffle.id, 1).expect("ticket").status, TicketStatus::Sold);
}

/// Test 11: the buyer status page reads pending, then approved once the
/// returning redirect's payment id is reconciled.
#[tokio::test]
async fn test_purchase_status() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    let reservation = h.reserve(raffle.id, vec![4]).await.expect("reserve");
    let server = open_server(&h);
    let path = format!("/api/purchases/{}/status", reservation.purchase_id);

    let pending = server.get(&path).await;
    pending.assert_status_ok();
    assert_eq!(pending.json::<Value>()["status"], json!("pending"));

    h.gateway.approve("pay-4", reservation.purchase_id);
    let approved = server.get(&path).add_query_param("payment_id", "pay-4").await;
    approved.assert_status_ok();
    assert_eq!(approved.json::<Value>()["status"], json!("approved"));

    server
        .get("/api/purchases/not-a-uuid/status")
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    server
        .get("/api/purchases/00000000-0000-4000-8000-000000000000/status")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

/// Test 12: the grid lists every ticket without owners.
#[tokio::test]
async fn test_ticket_grid() {
    let h = Harness::new();
    let raffle = h.active_raffle(5, 250).await;
    h.reserve(raffle.id, vec![2]).await.expect("reserve");
    let server = open_server(&h);

    let response = server.get(&format!("/api/raffles/{}/tickets", raffle.id)).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["tickets"].as_array().map(Vec::len), Some(5));
    assert_eq!(body["tickets"][1], json!({ "number": 2, "status": "pending" }));
    assert_eq!(body["counts"], json!({ "available": 4, "pending": 1, "sold": 0 }));
    assert!(body["raffle"].get("creator_email").is_none());
}

/// Test 13: admin endpoints need the operator token.
#[tokio::test]
async fn test_admin_requires_token() {
    let h = Harness::new();
    let server = open_server(&h);

    server
        .post("/api/admin/sweep")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let (name, value) = bearer("wrong");
    server
        .post("/api/admin/sweep")
        .add_header(name, value)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let (name, value) = bearer(OPERATOR_TOKEN);
    server
        .post("/api/admin/sweep")
        .add_header(name, value)
        .await
        .assert_status_ok();

    // No token configured: admin is closed.
    let closed = server_without_admin(&h);
    let (name, value) = bearer(OPERATOR_TOKEN);
    closed
        .post("/api/admin/sweep")
        .add_header(name, value)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

fn server_without_admin(h: &Harness) -> TestServer {
    server(h, Security::default())
}

/// Test 14: the admin sweep expires overdue holds.
#[tokio::test]
async fn test_admin_sweep() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    h.reserve(raffle.id, vec![1, 2]).await.expect("reserve");
    h.clock.advance(Duration::minutes(30));
    let server = open_server(&h);

    let (name, value) = bearer(OPERATOR_TOKEN);
    let response = server
        .post("/api/admin/sweep")
        .add_header(name, value)
        .json(&json!({ "raffle_id": raffle.id }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["expired"], json!(1));
    assert_eq!(body["released"], json!(2));
}

/// Test 15: admin reconcile by purchase and by payment ids.
#[tokio::test]
async fn test_admin_reconcile() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    let first = h.reserve(raffle.id, vec![1]).await.expect("reserve");
    let second = h.reserve(raffle.id, vec![2]).await.expect("reserve");
    h.gateway.approve("pay-1", first.purchase_id);
    h.gateway.reject("pay-2", second.purchase_id);
    let server = open_server(&h);

    let (name, value) = bearer(OPERATOR_TOKEN);
    let by_purchase = server
        .post("/api/admin/reconcile")
        .add_header(name, value)
        .json(&json!({ "purchase_id": first.purchase_id }))
        .await;
    by_purchase.assert_status_ok();
    assert_eq!(by_purchase.json::<Value>()["results"][0]["result"]["outcome"], json!("applied"));

    let (name, value) = bearer(OPERATOR_TOKEN);
    let by_payments = server
        .post("/api/admin/reconcile")
        .add_header(name, value)
        .json(&json!({ "payment_ids": ["pay-2", "pay-missing"] }))
        .await;
    by_payments.assert_status_ok();
    let results = by_payments.json::<Value>()["results"].clone();
    assert_eq!(results[0]["id"], json!("pay-2"));
    assert_eq!(results[0]["result"]["outcome"], json!("applied"));
    assert_eq!(results[1]["error"], json!("gateway_error"));

    assert_eq!(h.store.ticket(raffle.id, 1).expect("ticket").status, TicketStatus::Sold);
    assert_eq!(h.store.ticket(raffle.id, 2).expect("ticket").status, TicketStatus::Available);
}

/// Test 16: raffle administration over HTTP.
#[tokio::test]
async fn test_admin_raffle_lifecycle() {
    let h = Harness::new();
    let server = open_server(&h);

    let (name, value) = bearer(OPERATOR_TOKEN);
    let created = server
        .post("/api/admin/raffles")
        .add_header(name, value)
        .json(&json!({
            "title": "Bike",
            "unit_price": 1000,
            "total_tickets": 10,
            "ends_at": h.clock.now() + Duration::days(7),
            "creator_email": CREATOR
        }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let raffle: Value = created.json();
    assert_eq!(raffle["status"], json!("draft"));
    let id = raffle["id"].as_str().expect("id").to_string();

    let (name, value) = bearer(OPERATOR_TOKEN);
    let activated = server
        .post(&format!("/api/admin/raffles/{id}/activate"))
        .add_header(name, value)
        .await;
    activated.assert_status_ok();
    assert_eq!(activated.json::<Value>()["status"], json!("active"));

    let (name, value) = bearer(OPERATOR_TOKEN);
    let deleted = server
        .delete(&format!("/api/admin/raffles/{id}"))
        .add_header(name, value)
        .await;
    deleted.assert_status_ok();
    assert_eq!(deleted.json::<Value>()["outcome"], json!("removed"));

    server
        .get(&format!("/api/raffles/{id}/tickets"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

/// Test 17: liveness and readiness.
#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let server = open_server(&h);

    server.get("/health").await.assert_status_ok();
    server.get("/ready").await.assert_status_ok();

    h.store.set_offline(true);
    server
        .get("/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

/// Test 18: ids that are not gateway payment ids never reach the gateway or
/// the payment records.
#[tokio::test]
async fn test_malformed_payment_ids_rejected() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    let reservation = h.reserve(raffle.id, vec![3]).await.expect("reserve");
    let server = open_server(&h);
    let hostile = "../../checkout/preferences/abc";

    server
        .post("/api/webhooks/payments")
        .json(&payment_body(hostile))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post("/api/webhooks/payments")
        .add_query_param("topic", "payment")
        .add_query_param("id", "search?external_reference=x")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .get(&format!("/api/purchases/{}/status", reservation.purchase_id))
        .add_query_param("payment_id", hostile)
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let (name, value) = bearer(OPERATOR_TOKEN);
    server
        .post("/api/admin/reconcile")
        .add_header(name, value)
        .json(&json!({ "payment_ids": ["pay-1", hostile] }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(h.gateway.payment_fetches(), 0);
    assert!(h.store.payment_record(hostile).is_none());
}

/// Test 19: a malformed sweep body is refused instead of sweeping everything.
#[tokio::test]
async fn test_admin_sweep_malformed_body() {
    let h = Harness::new();
    let raffle = h.active_raffle(20, 250).await;
    h.reserve(raffle.id, vec![1]).await.expect("reserve");
    h.clock.advance(Duration::minutes(30));
    let server = open_server(&h);

    let (name, value) = bearer(OPERATOR_TOKEN);
    let response = server
        .post("/api/admin/sweep")
        .add_header(name, value)
        .json(&json!({ "raffle_id": "nope" }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], json!("validation_error"));
    assert_eq!(h.store.ticket(raffle.id, 1).expect("ticket").status, TicketStatus::Pending);
}
