//! HTTP API tests driving the router directly.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use sandbox_runner::api::{self, AppState};
use sandbox_runner::testing::mocks::{MemoryFileProvider, MockBehavior, MockProvider};
use sandbox_runner::testing::{test_config, TestHarness};
use sandbox_runner::Config;

fn app_with(harness: &TestHarness, config: &Config) -> Router {
    let state = AppState::new(harness.manager.clone(), config, CancellationToken::new()).unwrap();
    api::router(state, config.api.cors_enabled)
}

fn app(harness: &TestHarness) -> Router {
    app_with(harness, &Config::default())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn exec_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/exec")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_get_spec_lists_entries_with_aliases() {
    let harness = TestHarness::new(MockBehavior::default());

    let (status, body) = send(app(&harness), get("/v1/spec")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["python3"]["image"], "python:3-alpine");
    assert_eq!(body["python3"]["filename"], "main.py");
    assert_eq!(body["py"]["use"], "python3");
    assert_eq!(body["go"]["inline"]["import_regex"], r#"import\s+"[^"]+""#);
}

#[tokio::test]
async fn test_get_info() {
    let harness = TestHarness::new(MockBehavior::default());

    let (status, body) = send(app(&harness), get("/v1/info")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "sandbox": {"type": "mock", "version": "0.0.0"}
        })
    );
}

#[tokio::test]
async fn test_exec_success() {
    let harness = TestHarness::new(MockBehavior::default().with_stdout("hi\n"));

    let (status, body) = send(
        app(&harness),
        exec_request(json!({"language": "python3", "code": "print('hi')"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stdout"], "hi\n");
    assert_eq!(body["stderr"], "");
    assert!(body["exectimems"].is_u64());
}

#[tokio::test]
async fn test_exec_user_errors_are_bad_requests() {
    let harness = TestHarness::new(MockBehavior::default());

    let (status, body) = send(
        app(&harness),
        exec_request(json!({"language": "cobol", "code": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"error": "unsupported language spec: cobol", "code": 400})
    );

    let (status, body) = send(
        app(&harness),
        exec_request(json!({"language": "python3", "code": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "code is empty");
}

#[tokio::test]
async fn test_exec_output_len_exceeded() {
    let harness = TestHarness::new(MockBehavior::default().with_stdout("hello world"));
    let mut config = Config::default();
    config.api.max_output_len = "8".to_string();

    let (status, body) = send(
        app_with(&harness, &config),
        exec_request(json!({"language": "python3", "code": "print('hello world')"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "output len exceeded");
}

#[tokio::test]
async fn test_exec_timeout() {
    let harness =
        TestHarness::new(MockBehavior::default().running_for(Duration::from_secs(30)));

    let (status, body) = send(
        app(&harness),
        exec_request(json!({"language": "python3", "code": "while True: pass"})),
    )
    .await;

    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["code"], 408);
    assert!(harness.manager.running_ids().await.is_empty());
}

#[tokio::test]
async fn test_exec_system_error() {
    let harness = TestHarness::with_parts(
        MockProvider::new(MockBehavior::default()).failing_create(),
        MemoryFileProvider::new(),
        test_config(Path::new("/srv/sandbox")),
    );

    let (status, body) = send(
        app(&harness),
        exec_request(json!({"language": "python3", "code": "print(1)"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], 500);
}

#[tokio::test]
async fn test_cors_headers() {
    let harness = TestHarness::new(MockBehavior::default());

    let request = Request::builder()
        .uri("/v1/spec")
        .header("origin", "https://example.com")
        .body(Body::empty())
        .unwrap();
    let response = app(&harness).oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}
