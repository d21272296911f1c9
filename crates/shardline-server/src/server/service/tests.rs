use super::{AppState, Clock, IDENTITY_HEADER, router};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use core::time::Duration;
use serde_json::{Value, json};
use shardline::{ManualClock, Orchestrator, OrchestratorConfig};
use std::sync::Arc;
use tower::ServiceExt;

fn app(clock: &ManualClock) -> Router {
    let config = OrchestratorConfig {
        min_coin_interval: Duration::from_millis(5_000),
        liveness_timeout: Duration::from_millis(10_000),
        stagger_stride: Duration::from_millis(1_000),
        reap_interval: Duration::from_millis(1_000),
        report_counts_as_heartbeat: false,
        ..OrchestratorConfig::default()
    };
    let clock: Clock = Arc::new(clock.clone());
    let orchestrator = Orchestrator::new(config, clock).unwrap();
    router(AppState::new(Arc::new(orchestrator)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn shardcoin(identity: &str) -> Request<Body> {
    Request::builder()
        .uri("/shardcoin")
        .header(IDENTITY_HEADER, identity)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn allocate_returns_chunk_and_start_time() {
    let clock = ManualClock::new(50_000);
    let app = app(&clock);

    let (status, body) = send(&app, get("/allocate?key=worker-a")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"chunk": 0, "assignedStartTime": 50_000}));

    let (_, body) = send(&app, get("/allocate?key=worker-b")).await;
    assert_eq!(body, json!({"chunk": 1, "assignedStartTime": 51_000}));

    // Asking again changes nothing.
    let (_, body) = send(&app, get("/allocate?key=worker-a")).await;
    assert_eq!(body, json!({"chunk": 0, "assignedStartTime": 50_000}));
}

#[tokio::test]
async fn allocate_without_key_is_bad_request() {
    let clock = ManualClock::new(0);
    let app = app(&clock);

    for uri in ["/allocate", "/allocate?key="] {
        let (status, body) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("key"));
    }
}

#[tokio::test]
async fn shardcoin_grants_one_coin_per_interval() {
    let clock = ManualClock::new(0);
    let app = app(&clock);

    assert_eq!(send(&app, shardcoin("a")).await, (StatusCode::OK, json!(true)));
    assert_eq!(send(&app, shardcoin("b")).await, (StatusCode::OK, json!(false)));

    clock.advance(Duration::from_millis(5_000));
    assert_eq!(send(&app, shardcoin("b")).await, (StatusCode::OK, json!(true)));
}

#[tokio::test]
async fn shardcoin_without_identity_is_bad_request() {
    let clock = ManualClock::new(0);
    let app = app(&clock);

    let (status, body) = send(&app, get("/shardcoin")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // The rejected request did not spend the coin.
    assert_eq!(send(&app, shardcoin("a")).await, (StatusCode::OK, json!(true)));
}

#[tokio::test]
async fn heartbeat_for_unknown_key_is_not_found() {
    let clock = ManualClock::new(0);
    let app = app(&clock);

    let (status, body) = send(&app, post_json("/heartbeat", &json!({"key": "ghost"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn heartbeat_keeps_worker_alive() {
    let clock = ManualClock::new(0);
    let app = app(&clock);
    send(&app, get("/allocate?key=w")).await;

    clock.advance(Duration::from_millis(9_000));
    let (status, body) = send(&app, post_json("/heartbeat", &json!({"key": "w"}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    clock.advance(Duration::from_millis(9_000));
    let (status, _) = send(&app, post_json("/heartbeat", &json!({"key": "w"}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Silent for longer than the timeout.
    clock.advance(Duration::from_millis(10_001));
    let (status, _) = send(&app, post_json("/heartbeat", &json!({"key": "w"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn heartbeat_without_key_is_bad_request() {
    let clock = ManualClock::new(0);
    let app = app(&clock);

    for body in [json!({}), json!({"key": ""}), json!({"key": "  "})] {
        let (status, body) = send(&app, post_json("/heartbeat", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("key"));
    }

    let (status, _) = send(&app, post_json("/stats", &json!({"shards": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let clock = ManualClock::new(0);
    let app = app(&clock);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/heartbeat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn stats_are_reflected_in_status() {
    let clock = ManualClock::new(0);
    let app = app(&clock);
    send(&app, get("/allocate?key=w1")).await;
    send(&app, get("/allocate?key=w2")).await;

    let report = json!({
        "key": "w1",
        "shards": [
            {"shardId": 0, "status": "CONNECTED", "guilds": 1200, "users": 50000},
            {"shardId": 1, "status": "RESUMING", "guilds": 800, "users": 30000, "ping": 42}
        ]
    });
    let (status, _) = send(&app, post_json("/stats", &report)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allocations"], 2);
    assert_eq!(body["active"], 1);
    assert_eq!(body["pending"], 1);
    assert_eq!(body["highestChunk"], 1);
    assert_eq!(body["shardsReported"], 2);
    assert_eq!(body["guilds"], 2000);
    assert_eq!(body["users"], 80000);
    assert_eq!(body["rows"][0]["key"], "w1");
    assert_eq!(body["rows"][0]["reportCount"], 2);
    assert_eq!(body["rows"][1]["state"], "pending");
}

#[tokio::test]
async fn stats_without_shards_keep_the_previous_report() {
    let clock = ManualClock::new(0);
    let app = app(&clock);
    send(&app, get("/allocate?key=w1")).await;

    let report = json!({
        "key": "w1",
        "shards": [{"shardId": 0, "status": "CONNECTED", "guilds": 5, "users": 9}]
    });
    let (status, _) = send(&app, post_json("/stats", &report)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, post_json("/stats", &json!({"key": "w1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, body) = send(&app, get("/status")).await;
    assert_eq!(body["guilds"], 5);
    assert_eq!(body["rows"][0]["reportCount"], 1);
}

#[tokio::test]
async fn stats_for_unknown_key_is_not_found() {
    let clock = ManualClock::new(0);
    let app = app(&clock);

    let (status, _) = send(
        &app,
        post_json("/stats", &json!({"key": "ghost", "shards": []})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn idle_status_is_empty() {
    let clock = ManualClock::new(0);
    let app = app(&clock);

    let (status, body) = send(&app, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allocations"], 0);
    assert_eq!(body["highestChunk"], Value::Null);
    assert_eq!(body["lastCoinGrant"], Value::Null);
    assert_eq!(body["rows"], json!([]));
}
