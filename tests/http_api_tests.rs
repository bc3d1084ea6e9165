// Tests for the HTTP control API

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{Harness, MockDevices, OpenMode};
use serde_json::{json, Value};
use tower::ServiceExt;
use tutor_live::session::ConnectionState;
use tutor_live::{create_router, AppState, Subject, TutorSession};

fn app(h: &Harness) -> (Router, Arc<TutorSession>) {
    let tutor = Arc::new(TutorSession::new(Arc::clone(&h.session), Subject::Universal));
    (create_router(AppState::new(Arc::clone(&tutor))), tutor)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
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

#[tokio::test]
async fn test_health_check() {
    let h = Harness::new(OpenMode::Accept, MockDevices::default());
    let (app, _) = app(&h);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_status_when_idle() {
    let h = Harness::new(OpenMode::Accept, MockDevices::default());
    let (app, _) = app(&h);

    let (status, body) = call(&app, "GET", "/session", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connection_state"], "disconnected");
    assert_eq!(body["subject"]["id"], "universal");
    assert_eq!(body["turns"], json!([]));
}

#[tokio::test]
async fn test_connect_and_disconnect() {
    let h = Harness::new(OpenMode::Accept, MockDevices::default());
    let (app, _) = app(&h);

    let (status, body) = call(&app, "POST", "/session/connect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");

    let (status, _) = call(&app, "POST", "/session/connect", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app, "POST", "/session/disconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disconnected");
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_failure_maps_to_gateway_error() {
    let h = Harness::new(OpenMode::Reject, MockDevices::default());
    let (app, _) = app(&h);

    let (status, body) = call(&app, "POST", "/session/connect", None).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("setup refused"));
}

#[tokio::test]
async fn test_permission_denied_maps_to_forbidden() {
    let devices = MockDevices::default();
    devices.deny_microphone(true);
    let h = Harness::new(OpenMode::Accept, devices);
    let (app, _) = app(&h);

    let (status, _) = call(&app, "POST", "/session/connect", None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_text_requires_content() {
    let h = Harness::new(OpenMode::Accept, MockDevices::default());
    let (app, _) = app(&h);

    let (status, _) = call(&app, "POST", "/session/text", Some(json!({"text": "  "}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_text_connects_and_shows_turn() {
    let h = Harness::new(OpenMode::Accept, MockDevices::default());
    let (app, _) = app(&h);

    let (status, body) = call(
        &app,
        "POST",
        "/session/text",
        Some(json!({"text": "teach me fractions"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "connected");

    h.wait_for(|s| s.turns.len() == 1).await;
    let (status, turns) = call(&app, "GET", "/session/turns", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[0]["text"], "teach me fractions");
}

#[tokio::test]
async fn test_media_validation() {
    let h = Harness::new(OpenMode::Accept, MockDevices::default());
    let (app, _) = app(&h);
    call(&app, "POST", "/session/connect", None).await;

    let (status, _) = call(
        &app,
        "POST",
        "/session/media",
        Some(json!({"mime_type": "image/png", "data": "not base64!"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        "POST",
        "/session/media",
        Some(json!({"mime_type": "application/pdf", "data": "JVBERg=="})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("PDF"));
}

#[tokio::test]
async fn test_subject_switch() {
    let h = Harness::new(OpenMode::Accept, MockDevices::default());
    let (app, tutor) = app(&h);

    let (status, body) = call(
        &app,
        "POST",
        "/session/subject",
        Some(json!({"subject": "history"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "History");
    assert_eq!(tutor.subject(), Subject::History);

    let (status, _) = call(
        &app,
        "POST",
        "/session/subject",
        Some(json!({"subject": "astrology"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_subjects() {
    let h = Harness::new(OpenMode::Accept, MockDevices::default());
    let (app, _) = app(&h);

    let (status, body) = call(&app, "GET", "/subjects", None).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["universal", "math", "science", "history", "coding"]);
}
