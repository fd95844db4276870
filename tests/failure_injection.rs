//! Failure injection tests: retries, circuit breaking, recovery.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use api_gateway::config::GatewayConfig;
use api_gateway::resilience::CircuitState;
use api_gateway::upstream::{RpcCode, RpcError, RpcResponse};

mod common;

use common::{gateway, test_config, MockBackend};

/// Auth and rate limiting off so only the backend path is exercised.
fn backend_only_config() -> GatewayConfig {
    let mut config = test_config();
    config.auth.enabled = false;
    config.rate_limit.enabled = false;
    config
}

fn order_info() -> Request<Body> {
    Request::get("/api/orders/42").body(Body::empty()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let orders = MockBackend::new(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(RpcError::new(RpcCode::Unavailable, "warming up"))
        } else {
            Ok(RpcResponse::new(serde_json::json!({ "id": "42" })))
        }
    });
    let gw = gateway(&backend_only_config(), &[("orders", orders.clone())]);

    let response = gw.router.clone().oneshot(order_info()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(orders.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_bad_gateway() {
    let orders = MockBackend::failing(RpcCode::Unavailable);
    let gw = gateway(&backend_only_config(), &[("orders", orders.clone())]);

    let response = gw.router.clone().oneshot(order_info()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(orders.calls(), 3);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "retries_exhausted");
    assert!(!body["message"].as_str().unwrap().contains("injected"));
}

#[tokio::test]
async fn terminal_errors_are_not_retried() {
    let orders = MockBackend::new(|_| Err(RpcError::new(RpcCode::NotFound, "order 42 not found")));
    let gw = gateway(&backend_only_config(), &[("orders", orders.clone())]);

    let response = gw.router.clone().oneshot(order_info()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(orders.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn breaker_sheds_load_then_recovers() {
    let mut config = backend_only_config();
    config.retries.max_retries = 1;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.open_timeout_ms = 1_000;
    config.circuit_breaker.half_open_max_requests = 1;

    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let orders = MockBackend::new(move |_| {
        if flag.load(Ordering::SeqCst) {
            Ok(RpcResponse::new(serde_json::json!({ "id": "42" })))
        } else {
            Err(RpcError::new(RpcCode::Unavailable, "down"))
        }
    });
    let gw = gateway(&config, &[("orders", orders.clone())]);

    let mut statuses = Vec::new();
    for _ in 0..20 {
        let response = gw.router.clone().oneshot(order_info()).await.unwrap();
        statuses.push(response.status());
        if response.status() == StatusCode::SERVICE_UNAVAILABLE
            && response.headers().contains_key(header::RETRY_AFTER)
        {
            assert_eq!(response.headers()[header::RETRY_AFTER], "1");
        }
    }

    // Only the requests that tripped the breaker reached the backend.
    assert_eq!(orders.calls(), 3);
    assert!(statuses.iter().all(|s| *s == StatusCode::SERVICE_UNAVAILABLE));

    let entry = gw.dispatcher.registry().get("orders").unwrap();
    assert_eq!(entry.breaker.state(), CircuitState::Open);

    healthy.store(true, Ordering::SeqCst);
    let response = gw.router.clone().oneshot(order_info()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(orders.calls(), 3);

    tokio::time::advance(Duration::from_millis(1_001)).await;

    let response = gw.router.clone().oneshot(order_info()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(entry.breaker.state(), CircuitState::Closed);
    assert_eq!(entry.breaker.counts().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn breakers_are_isolated_per_service() {
    let mut config = backend_only_config();
    config.retries.max_retries = 1;
    config.circuit_breaker.failure_threshold = 1;

    let orders = MockBackend::failing(RpcCode::Unavailable);
    let users = MockBackend::echo();
    let gw = gateway(&config, &[("orders", orders), ("users", users.clone())]);

    gw.router.clone().oneshot(order_info()).await.unwrap();
    let open = gw.router.clone().oneshot(order_info()).await.unwrap();
    assert!(open.headers().contains_key(header::RETRY_AFTER));

    let request = Request::post("/api/users/reg").body(Body::empty()).unwrap();
    let response = gw.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(users.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn request_deadline_bounds_retries() {
    let mut config = backend_only_config();
    config.timeouts.request_secs = 1;
    config.retries.max_retries = 10;
    config.retries.base_delay_ms = 400;

    let orders = MockBackend::failing(RpcCode::Unavailable);
    let gw = gateway(&config, &[("orders", orders.clone())]);

    let response = gw.router.clone().oneshot(order_info()).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(orders.calls() < 10);
}
