//! HTTP surface: routes, status codes and machine-readable error codes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use chrono::Duration;
use common::Harness;
use registrations::api::USER_ID_HEADER;
use registrations::server::{AppState, build_router};
use registrations::{Event, EventId, UserId};
use rollcall_runtime::metrics::MetricsExporter;
use serde_json::{Value, json};
use tower::ServiceExt;

fn router(harness: &Harness) -> Router {
    build_router(AppState::new(harness.engine.clone(), MetricsExporter::disabled()))
}

async fn call(app: &Router, method: Method, uri: &str, user: Option<UserId>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header(USER_ID_HEADER, user.to_string());
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_event(harness: &Harness, app: &Router, capacity: u32, starts_in: Duration) -> Event {
    let starts_at = harness.now() + starts_in;
    let (status, body) = call(
        app,
        Method::POST,
        "/events",
        None,
        Some(json!({
            "name": "Career Fair Booth",
            "kind": "booth",
            "capacity": capacity,
            "price": 2_500,
            "starts_at": starts_at,
            "ends_at": starts_at + Duration::hours(6),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    serde_json::from_value(body).unwrap()
}

fn register_uri(user: UserId, event: EventId) -> String {
    format!("/users/{user}/register/{event}")
}

#[tokio::test]
async fn register_then_duplicate_then_full() {
    let harness = Harness::new();
    let app = router(&harness);
    let event = create_event(&harness, &app, 1, Duration::days(30)).await;
    let (a, b) = (UserId::new(), UserId::new());

    let (status, body) = call(
        &app,
        Method::POST,
        &register_uri(a, event.id),
        None,
        Some(json!({ "idempotency_key": "a-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["registration"]["status"], "confirmed");
    assert_eq!(body["payment"]["method"], "gateway");

    let (status, body) = call(
        &app,
        Method::POST,
        &register_uri(a, event.id),
        None,
        Some(json!({ "idempotency_key": "a-2" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ALREADY_REGISTERED");
    assert!(body["message"].as_str().unwrap().contains("already registered"));

    let (status, body) = call(
        &app,
        Method::POST,
        &register_uri(b, event.id),
        None,
        Some(json!({ "idempotency_key": "b-1", "preference": "gateway_only" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "EVENT_FULL");

    let (status, body) = call(&app, Method::GET, &format!("/events/{}", event.id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["spots_left"], 0);
    assert_eq!(body["is_full"], true);
}

#[tokio::test]
async fn waitlist_endpoints_use_the_caller_header() {
    let harness = Harness::new();
    let app = router(&harness);
    let event = create_event(&harness, &app, 1, Duration::days(30)).await;
    let (a, b) = (UserId::new(), UserId::new());
    call(
        &app,
        Method::POST,
        &register_uri(a, event.id),
        None,
        Some(json!({ "idempotency_key": "a" })),
    )
    .await;
    let uri = format!("/waitlist/{}", event.id);

    let (status, body) = call(&app, Method::POST, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, body) = call(&app, Method::POST, &uri, Some(b), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["position"], 1);

    let (status, body) = call(&app, Method::POST, &uri, Some(b), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_WAITLISTED");

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/payments/{}", event.id),
        Some(b),
        Some(json!({ "idempotency_key": "b-early" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PAYMENT_NOT_DUE");

    let (status, body) = call(&app, Method::DELETE, &uri, Some(b), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "withdrawn");

    let (status, body) = call(&app, Method::DELETE, &uri, Some(b), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_WAITLISTED");
}

#[tokio::test]
async fn refund_outside_window_is_bad_request() {
    let harness = Harness::new();
    let app = router(&harness);
    let event = create_event(&harness, &app, 3, Duration::days(10)).await;
    let user = UserId::new();
    call(
        &app,
        Method::POST,
        &register_uri(user, event.id),
        None,
        Some(json!({ "idempotency_key": "soon" })),
    )
    .await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/payments/{}/refund", event.id),
        Some(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "REFUND_WINDOW_CLOSED");
}

#[tokio::test]
async fn refund_inside_window_returns_the_refund() {
    let harness = Harness::new();
    let app = router(&harness);
    let event = create_event(&harness, &app, 3, Duration::days(30)).await;
    let user = UserId::new();
    call(
        &app,
        Method::POST,
        &register_uri(user, event.id),
        None,
        Some(json!({ "idempotency_key": "later" })),
    )
    .await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/payments/{}/refund", event.id),
        Some(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registration"]["status"], "cancelled");
    assert_eq!(body["refund"]["kind"], "refund");

    let (status, body) = call(&app, Method::GET, &format!("/users/{user}/payments"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn archive_blocks_registration() {
    let harness = Harness::new();
    let app = router(&harness);
    let event = create_event(&harness, &app, 3, Duration::days(30)).await;

    let (status, body) = call(
        &app,
        Method::PATCH,
        &format!("/events/{}", event.id),
        None,
        Some(json!({ "archived": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["archived"], true);

    let (status, body) = call(
        &app,
        Method::POST,
        &register_uri(UserId::new(), event.id),
        None,
        Some(json!({ "idempotency_key": "archived" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "REGISTRATION_CLOSED");
}

#[tokio::test]
async fn unknown_event_and_invalid_event() {
    let harness = Harness::new();
    let app = router(&harness);

    let (status, body) = call(&app, Method::GET, &format!("/events/{}", EventId::new()), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "EVENT_NOT_FOUND");

    let starts_at = harness.now() + Duration::days(3);
    let (status, body) = call(
        &app,
        Method::POST,
        "/events",
        None,
        Some(json!({
            "name": "Backwards Trip",
            "kind": "trip",
            "capacity": 10,
            "price": 0,
            "starts_at": starts_at,
            "ends_at": starts_at - Duration::hours(1),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_EVENT");
}

#[tokio::test]
async fn health_and_listing() {
    let harness = Harness::new();
    let app = router(&harness);
    create_event(&harness, &app, 2, Duration::days(30)).await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["events"], 1);

    let (status, body) = call(&app, Method::GET, "/events", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["spots_left"], 2);
}
