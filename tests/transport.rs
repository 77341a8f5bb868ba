mod common;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use reqwest::header::{HeaderValue, USER_AGENT};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{fast_transport, spawn_fixture};
use osintwatch::config::TransportConfig;
use osintwatch::transport::{RequestOptions, Transport, TransportError, USER_AGENTS};

#[derive(Clone, Default)]
struct Hits {
    flaky: Arc<AtomicUsize>,
    down: Arc<AtomicUsize>,
    missing: Arc<AtomicUsize>,
}

async fn flaky(State(hits): State<Hits>) -> (StatusCode, &'static str) {
    if hits.flaky.fetch_add(1, Ordering::SeqCst) < 2 {
        (StatusCode::SERVICE_UNAVAILABLE, "busy")
    } else {
        (StatusCode::OK, "finally")
    }
}

async fn down(State(hits): State<Hits>) -> (StatusCode, &'static str) {
    hits.down.fetch_add(1, Ordering::SeqCst);
    (StatusCode::SERVICE_UNAVAILABLE, "still down")
}

async fn missing(State(hits): State<Hits>) -> StatusCode {
    hits.missing.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND
}

async fn echo_agent(headers: HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

async fn fixture() -> (String, Hits) {
    let hits = Hits::default();
    let router = Router::new()
        .route("/flaky", get(flaky))
        .route("/down", get(down))
        .route("/missing", get(missing))
        .route("/ua", get(echo_agent))
        .with_state(hits.clone());
    (spawn_fixture(router).await, hits)
}

#[tokio::test]
async fn test_retries_transient_status_then_succeeds() {
    let (base, hits) = fixture().await;
    let transport = fast_transport(3);

    let resp = transport
        .get(&format!("{}/flaky", base), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "finally");
    assert_eq!(resp.attempts, 3);
    assert_eq!(hits.flaky.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_return_last_response() {
    let (base, hits) = fixture().await;
    let transport = fast_transport(2);

    let resp = transport
        .get(&format!("{}/down", base), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.attempts, 3);
    assert_eq!(hits.down.load(Ordering::SeqCst), 3);

    let err = resp.error_for_status().unwrap_err();
    assert!(matches!(err, TransportError::Status { .. }));
}

#[tokio::test]
async fn test_non_retryable_status_is_not_retried() {
    let (base, hits) = fixture().await;
    let transport = fast_transport(3);

    let resp = transport
        .get(&format!("{}/missing", base), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(hits.missing.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_user_agent_injected_unless_supplied() {
    let (base, _) = fixture().await;
    let transport = fast_transport(0);
    let url = format!("{}/ua", base);

    let injected = transport.get(&url, RequestOptions::default()).await.unwrap();
    assert!(USER_AGENTS.contains(&injected.text().as_str()));

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("custom-agent/1.0"));
    let custom = transport
        .get(
            &url,
            RequestOptions {
                headers,
                ..RequestOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(custom.text(), "custom-agent/1.0");
}

#[tokio::test]
async fn test_requests_are_paced() {
    let (base, _) = fixture().await;
    let cfg = TransportConfig {
        min_delay_secs: 0.3,
        max_delay_secs: 0.4,
        total_retries: 0,
        backoff_factor_secs: 0.0,
    };
    let transport = Transport::new(&cfg, Duration::from_secs(5));
    let url = format!("{}/ua", base);

    transport.get(&url, RequestOptions::default()).await.unwrap();
    let start = Instant::now();
    transport.get(&url, RequestOptions::default()).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(290));
}

#[tokio::test]
async fn test_connection_failure_is_request_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = fast_transport(3);
    let err = transport
        .get(&format!("http://{}/", addr), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Request(_)));
}
