//! End-to-end tests for the HTTP surface: lifecycle CRUD plus both SSE
//! streams, driven by a scripted provider over a real (fast) poll interval.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use veriflow_core::{
    AuthorizationService, CompletionRouter, EngineConfig, FlowKind, ProviderStatus, StatusPoll,
};
use veriflow_testing::mocks::{RecordingHandler, ScriptedProvider};
use veriflow_web::{router, AppState};

struct Harness {
    server: TestServer,
    provider: Arc<ScriptedProvider>,
    handler: Arc<RecordingHandler>,
    service: Arc<AuthorizationService>,
}

fn harness(script: Vec<StatusPoll>) -> Harness {
    harness_with_config(
        script,
        EngineConfig::new().with_poll_interval(Duration::from_millis(20)),
    )
}

fn harness_with_config(script: Vec<StatusPoll>, config: EngineConfig) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let provider = ScriptedProvider::answering(script);
    let handler = RecordingHandler::completing(json!({ "sub": "u1" }));
    let completions = Arc::new(CompletionRouter::new().with(
        FlowKind::new("signup"),
        Arc::clone(&handler) as Arc<dyn veriflow_core::CompletionHandler>,
    ));
    let service = Arc::new(AuthorizationService::new(
        Arc::clone(&provider) as Arc<dyn veriflow_core::VerificationProvider>,
        completions,
        config,
    ));
    let server = TestServer::new(router(AppState::new(Arc::clone(&service))))
        .expect("router should build");
    Harness {
        server,
        provider,
        handler,
        service,
    }
}

fn session_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-session-id"),
        HeaderValue::from_static("sess-1"),
    )
}

async fn create_request(server: &TestServer) -> Value {
    let response = server
        .post("/api/v1/requests")
        .json(&json!({
            "kind": "signup",
            "mode": "same_device",
            "scope": { "owner_session": "sess-1" },
            "metadata": { "locale": "en" },
            "requestedAttributes": ["given_name"],
            "purpose": "account signup",
        }))
        .await;
    response.assert_status(http::StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn health_is_ok() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let response = harness.server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn create_then_read_request() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let created = create_request(&harness.server).await;

    assert_eq!(created["request"]["status"], "pending");
    assert_eq!(created["walletHandoff"]["uri"], "wallet://txn-0");
    assert_eq!(harness.provider.created_count(), 1);

    let id = created["request"]["id"].as_str().unwrap();
    let response = harness.server.get(&format!("/api/v1/requests/{id}")).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "pending");
}

#[tokio::test]
async fn unknown_request_reads_as_not_found() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let response = harness
        .server
        .get("/api/v1/requests/00000000-0000-0000-0000-000000000000")
        .await;
    response.assert_status(http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_rejects_empty_kind() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let response = harness
        .server
        .post("/api/v1/requests")
        .json(&json!({
            "kind": "",
            "mode": "same_device",
            "scope": { "owner_session": "sess-1" },
            "purpose": "account signup",
        }))
        .await;
    response.assert_status(http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn business_stream_requires_matching_credential() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let created = create_request(&harness.server).await;
    let id = created["request"]["id"].as_str().unwrap().to_string();

    // No credential at all: the scope needs a session value.
    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/stream"))
        .await;
    response.assert_status(http::StatusCode::UNAUTHORIZED);

    // Wrong session value.
    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/stream"))
        .add_header(
            HeaderName::from_static("x-session-id"),
            HeaderValue::from_static("sess-2"),
        )
        .await;
    response.assert_status(http::StatusCode::FORBIDDEN);

    // A bearer token alone does not satisfy a session scope.
    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/stream"))
        .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer user-1"))
        .await;
    response.assert_status(http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn business_stream_delivers_resolution_and_closes() {
    let harness = harness(vec![
        StatusPoll::of(ProviderStatus::Pending),
        StatusPoll::of(ProviderStatus::Pending),
        StatusPoll::of(ProviderStatus::Authorized),
    ]);
    let created = create_request(&harness.server).await;
    let id = created["request"]["id"].as_str().unwrap().to_string();

    let (name, value) = session_header();
    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/stream"))
        .add_header(name, value)
        .await;
    response.assert_status_ok();

    let body = response.text();
    assert!(body.contains("event: connected"), "body: {body}");
    assert!(body.contains("event: completed"), "body: {body}");
    assert!(body.contains("\"status\":\"completed\""), "body: {body}");
    assert_eq!(harness.handler.call_count(), 1);
}

#[tokio::test]
async fn business_stream_delivers_expired_to_a_late_subscriber() {
    let harness = harness_with_config(
        vec![StatusPoll::of(ProviderStatus::Pending)],
        EngineConfig::new()
            .with_poll_interval(Duration::from_millis(20))
            .with_default_ttl(chrono::Duration::zero()),
    );
    let created = create_request(&harness.server).await;
    let id = created["request"]["id"].as_str().unwrap().to_string();

    // The row lazily expires on the next read, whether that is the stream's
    // own snapshot or a monitor tick; either way the subscriber must still
    // get `connected` plus the single terminal event, not a 404.
    let (name, value) = session_header();
    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/stream"))
        .add_header(name, value)
        .await;
    response.assert_status_ok();

    let body = response.text();
    assert!(body.contains("event: connected"), "body: {body}");
    assert!(body.contains("event: expired"), "body: {body}");
}

#[tokio::test]
async fn business_stream_short_circuits_on_terminal_request() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Rejected)]);
    let created = create_request(&harness.server).await;
    let id = created["request"]["id"].as_str().unwrap().to_string();
    let correlation = created["request"]["correlationId"].as_str().unwrap();

    // Let the monitor fail the request before connecting.
    harness
        .service
        .await_resolution(correlation.parse().unwrap(), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    let (name, value) = session_header();
    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/stream"))
        .add_header(name, value)
        .await;
    response.assert_status_ok();

    let body = response.text();
    assert!(body.contains("event: failed"), "body: {body}");
    assert!(body.contains("\"status\":\"failed\""), "body: {body}");
}

#[tokio::test]
async fn debug_stream_replays_history_for_terminal_request() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Authorized)]);
    let created = create_request(&harness.server).await;
    let id = created["request"]["id"].as_str().unwrap().to_string();
    let correlation = created["request"]["correlationId"].as_str().unwrap();

    harness
        .service
        .await_resolution(correlation.parse().unwrap(), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    // Session credential via query parameter, no headers.
    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/debug/stream?session=sess-1"))
        .await;
    response.assert_status_ok();

    let body = response.text();
    assert!(body.contains("event: connected"), "body: {body}");
    assert!(body.contains("request_created"), "body: {body}");
    assert!(body.contains("provider_status"), "body: {body}");
    assert!(body.contains("event: closed"), "body: {body}");
    assert!(body.contains("request resolved"), "body: {body}");
}

#[tokio::test]
async fn debug_stream_delivers_replay_then_live_without_duplicates() {
    let harness = harness(vec![
        StatusPoll::of(ProviderStatus::Pending),
        StatusPoll::of(ProviderStatus::Pending),
        StatusPoll::of(ProviderStatus::Authorized),
    ]);
    let created = create_request(&harness.server).await;
    let id = created["request"]["id"].as_str().unwrap().to_string();

    // Connect while the request is still pending: some events arrive via
    // replay, the rest live, and the stream closes on the terminal stage.
    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/debug/stream?session=sess-1"))
        .await;
    response.assert_status_ok();

    let body = response.text();
    assert!(body.contains("event: connected"), "body: {body}");
    assert!(body.contains("event: closed"), "body: {body}");

    // Every diagnostic seq appears exactly once, in increasing order.
    let seqs: Vec<u64> = body
        .match_indices("\"seq\":")
        .map(|(at, tag)| {
            body[at + tag.len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap()
        })
        .collect();
    assert!(!seqs.is_empty(), "body: {body}");
    assert!(
        seqs.windows(2).all(|pair| pair[0] < pair[1]),
        "seqs out of order or duplicated: {seqs:?}"
    );
}

#[tokio::test]
async fn debug_stream_enforces_scope() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let created = create_request(&harness.server).await;
    let id = created["request"]["id"].as_str().unwrap().to_string();

    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/debug/stream"))
        .await;
    response.assert_status(http::StatusCode::UNAUTHORIZED);

    let response = harness
        .server
        .get(&format!("/api/v1/requests/{id}/debug/stream?session=sess-2"))
        .await;
    response.assert_status(http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn wallet_response_resolves_request() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let created = create_request(&harness.server).await;
    let correlation = created["request"]["correlationId"].as_str().unwrap();

    harness.provider.rescript(vec![Ok(StatusPoll::of(ProviderStatus::Authorized))]);

    let response = harness
        .server
        .post("/api/v1/wallet-responses")
        .json(&json!({
            "correlationId": correlation,
            "origin": "https://wallet.example",
            "response": { "vp_token": "..." },
        }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "completed");
    assert_eq!(harness.handler.call_count(), 1);
}

#[tokio::test]
async fn wallet_response_for_unknown_correlation_is_not_found() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let response = harness
        .server
        .post("/api/v1/wallet-responses")
        .json(&json!({
            "correlationId": "txn-missing",
            "response": {},
        }))
        .await;
    response.assert_status(http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resolution_endpoint_times_out_to_snapshot() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let created = create_request(&harness.server).await;
    let correlation = created["request"]["correlationId"].as_str().unwrap();

    let response = harness
        .server
        .get(&format!(
            "/api/v1/correlations/{correlation}/resolution?timeoutMs=50"
        ))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "pending");
}

#[tokio::test]
async fn delete_removes_request_and_monitor() {
    let harness = harness(vec![StatusPoll::of(ProviderStatus::Pending)]);
    let created = create_request(&harness.server).await;
    let id = created["request"]["id"].as_str().unwrap().to_string();

    let response = harness
        .server
        .delete(&format!("/api/v1/requests/{id}"))
        .await;
    response.assert_status(http::StatusCode::NO_CONTENT);
    assert_eq!(harness.service.monitor().registered_count(), 0);

    let response = harness.server.get(&format!("/api/v1/requests/{id}")).await;
    response.assert_status(http::StatusCode::NOT_FOUND);
}
