//! API endpoint integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::Value;
use sightline_gateway::api::{ApiState, router};
use sightline_gateway::{Config, Daemon};
use tower::ServiceExt;

mod common;
use common::{MockEngine, RecordingLink, jpeg, scene};

const BOUNDARY: &str = "sightline-test-boundary";

/// Build a test API router around a mock engine
fn build_test_router() -> (axum::Router, Arc<MockEngine>) {
    let engine = MockEngine::new();
    let daemon = Daemon::new(Config::default(), engine.clone(), RecordingLink::new()).unwrap();
    let state = Arc::new(ApiState {
        daemon: Arc::new(daemon),
        packets: None,
    });
    (router(state), engine)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn multipart(uri: &str, field: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"frame.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = build_test_router();
    let (status, json) = send(&app, empty("GET", "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_join_and_duplicate_join() {
    let (app, engine) = build_test_router();

    let (status, json) = send(&app, empty("POST", "/api/participants/alice")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["participant"], "alice");
    assert_eq!(json["state"], "active");
    assert!(json["session_id"].is_string());

    let (status, json) = send(&app, empty("POST", "/api/participants/alice")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "conflict");

    // greeting was seeded once
    assert_eq!(engine.commands_for("alice").await.len(), 2);
}

#[tokio::test]
async fn test_join_failure_is_bad_gateway() {
    let (app, engine) = build_test_router();
    engine.fail_for("bob").await;

    let (status, json) = send(&app, empty("POST", "/api/participants/bob")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "session_open_failed");

    let (status, _) = send(&app, empty("GET", "/api/participants/bob")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_frame_ingest() {
    let (app, _) = build_test_router();
    let frame = jpeg(&scene(64, 48, false), 85);

    // unknown participant
    let (status, _) = send(&app, multipart("/api/participants/carol/frames", "frame", &frame)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, empty("POST", "/api/participants/carol")).await;
    assert_eq!(status, StatusCode::CREATED);

    // wrong field name
    let (status, json) = send(&app, multipart("/api/participants/carol/frames", "image", &frame)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["message"], "No frame provided");

    // empty field
    let (status, _) = send(&app, multipart("/api/participants/carol/frames", "frame", b"")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // not an image
    let (status, _) = send(
        &app,
        multipart("/api/participants/carol/frames", "frame", b"definitely not a jpeg"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, multipart("/api/participants/carol/frames", "frame", &frame)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, Value::Null);

    let (status, json) = send(&app, empty("GET", "/api/participants/carol")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["session"], "active");
    assert_eq!(json["frames"]["evaluated"], 2);
    assert_eq!(json["frames"]["undigestable"], 1);
    assert_eq!(json["sampling"], false);
}

#[tokio::test]
async fn test_leave() {
    let (app, _) = build_test_router();

    let (status, _) = send(&app, empty("DELETE", "/api/participants/dave")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app, empty("POST", "/api/participants/dave")).await;
    let (status, json) = send(&app, empty("DELETE", "/api/participants/dave")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["participant"], "dave");
    assert_eq!(json["state"], "closed");

    let (status, _) = send(&app, empty("GET", "/api/participants/dave")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

