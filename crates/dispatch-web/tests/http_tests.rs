//! HTTP adapter behaviour against an in-memory dispatch service.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use dispatch_notify::{MessagePolicy, NoopNotifier};
use dispatch_web::{router, WebState};
use dispatchd::{DispatchService, EventBus, SqliteStore};
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tower::ServiceExt;

fn mk_state() -> WebState {
    let store = SqliteStore::open_in_memory().expect("open");
    store.migrate().expect("migrate");
    let service = DispatchService::new(
        Arc::new(store),
        EventBus::new(8),
        Arc::new(NoopNotifier),
        MessagePolicy::default(),
    );
    WebState::new(Arc::new(service))
}

fn app(state: &WebState) -> Router {
    router(state.clone())
}

async fn send(state: &WebState, request: Request<Body>) -> (StatusCode, Value) {
    let response = app(state).oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

#[tokio::test]
async fn health_reports_ok() {
    let state = mk_state();
    let (status, body) = send(&state, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn create_and_list_jobs() {
    let state = mk_state();
    let (status, created) = send(
        &state,
        post_json(
            "/api/jobs",
            json!({ "title": "Bakery surplus", "location": "123 Main St", "food_type": "bread" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "open");
    assert_eq!(created["food_type"], "bread");
    assert_eq!(created["claimed_by"], Value::Null);

    let (status, listed) = send(&state, get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, json!([created]));

    let (status, empty) = send(&state, get("/api/jobs?status=delivered")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(empty, json!([]));
}

#[tokio::test]
async fn create_without_title_is_400() {
    let state = mk_state();
    let (status, body) = send(&state, post_json("/api/jobs", json!({ "location": "X" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn claim_conflict_and_not_found_are_distinct() {
    let state = mk_state();
    let (_, job) = send(&state, post_json("/api/jobs", json!({ "title": "A", "location": "X" }))).await;
    let claim_uri = format!("/api/jobs/{}/claim", job["id"]);

    let (status, claimed) = send(&state, post_json(&claim_uri, json!({ "driver_name": "X" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["claimed_by"], "X");
    assert_eq!(claimed["status"], "claimed");

    let (status, body) = send(&state, post_json(&claim_uri, json!({ "driver_name": "Y" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_claimed");

    let (status, body) = send(
        &state,
        post_json("/api/jobs/9999/claim", json!({ "driver_name": "Y" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = send(&state, post_json(&claim_uri, json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn status_and_photo_routes() {
    let state = mk_state();
    let (_, job) = send(&state, post_json("/api/jobs", json!({ "title": "A", "location": "X" }))).await;
    let id = &job["id"];

    let (status, body) = send(
        &state,
        post_json(&format!("/api/jobs/{id}/status"), json!({ "status": "Delivered" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_status");

    let (status, body) = send(
        &state,
        post_json(&format!("/api/jobs/{id}/status"), json!({ "status": "delivered" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");

    let (status, body) = send(
        &state,
        post_json(&format!("/api/jobs/{id}/photo"), json!({ "photo_path": "/uploads/1.jpg" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["photo_path"], "/uploads/1.jpg");

    let (status, _) = send(
        &state,
        post_json("/api/jobs/9999/status", json!({ "status": "delivered" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn driver_routes() {
    let state = mk_state();
    let (status, body) = send(&state, post_json("/api/drivers", json!({ "name": "Ana" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, ana) = send(
        &state,
        post_json("/api/drivers", json!({ "name": "Ana", "phone": "+15550001111" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ana["is_active"], true);

    let (status, toggled) = send(
        &state,
        post_json(&format!("/api/drivers/{}/toggle", ana["id"]), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["is_active"], false);

    let (status, listed) = send(&state, get("/api/drivers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, _) = send(&state, post_json("/api/drivers/77/toggle", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_stream_signals_job_changes() {
    let state = mk_state();
    let response = app(&state)
        .oneshot(get("/api/events"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.service().bus().subscriber_count(), 1);

    let (status, _) = send(&state, post_json("/api/jobs", json!({ "title": "A", "location": "X" }))).await;
    assert_eq!(status, StatusCode::OK);

    let mut frames = response.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("frame before timeout")
        .expect("stream open")
        .expect("frame bytes");
    let text = String::from_utf8(frame.to_vec()).expect("utf8");
    assert!(text.contains("event: jobs_changed"), "{text}");
    assert!(text.contains("\"kind\":\"jobs_changed\""), "{text}");

    drop(frames);
    assert_eq!(state.service().bus().subscriber_count(), 0);
}
