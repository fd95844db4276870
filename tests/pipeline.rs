//! Request pipeline tests: stage order, auth, correlation ids, cookies.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use tower::ServiceExt;

mod common;

use api_gateway::upstream::BackendClient;
use common::{gateway, gateway_with, test_config, users_backend, GatedBackend, MockBackend};

async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

async fn json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn authed(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, "Bearer jwt-token")
        .header(header::COOKIE, "session_key=sess-1")
}

#[tokio::test]
async fn rate_limit_runs_before_auth() {
    let mut config = test_config();
    config.rate_limit.max_requests = 2;
    let users = users_backend();
    let gw = gateway(&config, &[("users", users.clone()), ("orders", MockBackend::echo())]);

    for _ in 0..2 {
        let response = send(&gw.router, get("/api/orders/42")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = send(&gw.router, authed("GET", "/api/orders/42").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json(response).await["error"], "rate_limited");
    assert_eq!(users.calls(), 0);
}

#[tokio::test]
async fn public_routes_skip_auth() {
    let users = users_backend();
    let gw = gateway(&test_config(), &[("users", users.clone())]);

    let request = Request::post("/api/users/reg")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"email":"a@b.c","password":"pw"}"#))
        .unwrap();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["operation"], "RegUser");

    let seen = users.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].operation, "RegUser");
    assert_eq!(seen[0].payload["email"], "a@b.c");
    assert!(seen[0].identity.is_none());
}

#[tokio::test]
async fn missing_credentials_are_rejected_with_request_id() {
    let orders = MockBackend::echo();
    let gw = gateway(&test_config(), &[("users", users_backend()), ("orders", orders.clone())]);

    let response = send(&gw.router, get("/api/orders/42")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let header_id = response.headers()["x-request-id"].to_str().unwrap().to_string();

    let body = json(response).await;
    assert_eq!(body["error"], "unauthenticated");
    assert_eq!(body["request_id"], header_id.as_str());
    assert_eq!(orders.calls(), 0);
}

#[tokio::test]
async fn bearer_without_session_cookie_is_rejected() {
    let gw = gateway(&test_config(), &[("users", users_backend()), ("orders", MockBackend::echo())]);

    let request = Request::get("/api/orders/42")
        .header(header::AUTHORIZATION, "Bearer jwt-token")
        .body(Body::empty())
        .unwrap();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("session_key"));
}

#[tokio::test]
async fn resolved_identity_is_forwarded() {
    let users = users_backend();
    let orders = MockBackend::echo();
    let gw = gateway(&test_config(), &[("users", users.clone()), ("orders", orders.clone())]);

    let response = send(&gw.router, authed("GET", "/api/orders/42").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["operation"], "OrderInfo");
    assert_eq!(body["params"]["orderID"], "42");
    assert_eq!(body["identity"]["subject_id"], "user-1");

    let auth_call = &users.requests()[0];
    assert_eq!(auth_call.operation, "ExtJWTData");
    assert_eq!(auth_call.payload["token"], "jwt-token");
    assert_eq!(auth_call.payload["session_key"], "sess-1");

    let forwarded = &orders.requests()[0];
    assert_eq!(forwarded.session_key.as_deref(), Some("sess-1"));
    assert_eq!(forwarded.identity.as_ref().unwrap().role, "admin");
}

#[tokio::test]
async fn unresolved_credentials_are_rejected() {
    let users = MockBackend::new(|_| {
        Ok(api_gateway::upstream::RpcResponse::new(serde_json::json!({ "role": "admin" })))
    });
    let orders = MockBackend::echo();
    let gw = gateway(&test_config(), &[("users", users), ("orders", orders.clone())]);

    let response = send(&gw.router, authed("DELETE", "/api/orders/del/42").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(orders.calls(), 0);
}

#[tokio::test]
async fn login_issues_session_cookie() {
    let gw = gateway(&test_config(), &[("users", users_backend())]);

    let request = Request::post("/api/users/log")
        .body(Body::from(r#"{"email":"a@b.c","password":"pw"}"#))
        .unwrap();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("session_key=sess-1;"));
    assert!(cookie.contains("HttpOnly"));

    let body = json(response).await;
    assert_eq!(body["token"], "jwt-token");
    assert!(body.get("session_key").is_none());
}

#[tokio::test]
async fn invalid_json_body_is_a_validation_error() {
    let users = users_backend();
    let gw = gateway(&test_config(), &[("users", users.clone())]);

    let request = Request::post("/api/users/reg").body(Body::from("{not json")).unwrap();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "validation_failed");
    assert_eq!(users.calls(), 0);
}

#[tokio::test]
async fn root_and_request_id_echo() {
    let gw = gateway(&test_config(), &[("users", users_backend())]);

    let request = Request::get("/")
        .header("x-request-id", "client-req-7")
        .body(Body::empty())
        .unwrap();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "client-req-7");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"root");
}

#[tokio::test]
async fn malformed_request_id_is_replaced() {
    let gw = gateway(&test_config(), &[("users", users_backend())]);

    let request = Request::get("/")
        .header("x-request-id", "has spaces in it")
        .body(Body::empty())
        .unwrap();
    let response = send(&gw.router, request).await;
    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert_ne!(id, "has spaces in it");
    assert!(!id.is_empty());
}

#[tokio::test]
async fn unmatched_route_is_structured_404() {
    let gw = gateway(&test_config(), &[("users", users_backend())]);

    let response = send(&gw.router, authed("GET", "/api/nowhere").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json(response).await;
    assert_eq!(body["error"], "not_found");
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn metrics_route_is_public() {
    let gw = gateway(&test_config(), &[("users", users_backend())]);

    // No recorder is installed here, so the route answers with a 404 body.
    let response = send(&gw.router, get("/metrics")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let mut config = test_config();
    config.security.max_body_size = 16;
    let users = users_backend();
    let gw = gateway(&config, &[("users", users.clone())]);

    let request = Request::post("/api/users/reg")
        .header(header::CONTENT_LENGTH, "64")
        .body(Body::from(vec![b' '; 64]))
        .unwrap();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(users.calls(), 0);
}

#[tokio::test]
async fn handler_panic_is_structured_500() {
    let mut config = test_config();
    config.auth.enabled = false;
    let orders = MockBackend::new(|_| panic!("backend mock blew up"));
    let gw = gateway(&config, &[("orders", orders)]);

    let response = send(&gw.router, get("/api/orders/42")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(json(response).await["error"], "internal");

    // The gateway keeps serving after the panic.
    let response = send(&gw.router, get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn json_responses_are_gzipped_on_request() {
    let mut config = test_config();
    config.auth.enabled = false;
    let orders = MockBackend::new(|_| {
        Ok(api_gateway::upstream::RpcResponse::new(serde_json::json!({
            "id": "42",
            "status": "paid",
            "items": ["book", "pen", "lamp", "chair"],
        })))
    });
    let gw = gateway(&config, &[("orders", orders)]);

    let request = Request::get("/api/orders/42")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");

    let plain = send(&gw.router, get("/api/orders/42")).await;
    assert!(!plain.headers().contains_key(header::CONTENT_ENCODING));
    assert_eq!(json(plain).await["status"], "paid");
}

#[tokio::test]
async fn cors_preflight_needs_no_credentials() {
    let orders = MockBackend::echo();
    let gw = gateway(&test_config(), &[("users", users_backend()), ("orders", orders.clone())]);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/orders/42")
        .header(header::ORIGIN, "https://shop.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
        .body(Body::empty())
        .unwrap();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://shop.example.com");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "3600");
    assert_eq!(orders.calls(), 0);
}

#[tokio::test]
async fn requests_over_capacity_are_shed() {
    let mut config = test_config();
    config.auth.enabled = false;
    config.rate_limit.enabled = false;
    config.server.max_concurrent_requests = 1;
    let orders = GatedBackend::new();
    let gw = gateway_with(&config, &[("orders", orders.clone() as Arc<dyn BackendClient>)]);

    let router = gw.router.clone();
    let first = tokio::spawn(async move { send(&router, get("/api/orders/1")).await });
    orders.entered.notified().await;

    let response = send(&gw.router, get("/api/orders/2")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(json(response).await["error"], "overloaded");

    orders.open();
    assert_eq!(first.await.unwrap().status(), StatusCode::OK);

    let response = send(&gw.router, get("/api/orders/3")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn stalled_request_body_hits_response_timeout() {
    let mut config = test_config();
    config.timeouts.request_secs = 1;
    config.server.response_timeout_secs = 2;
    let users = users_backend();
    let gw = gateway(&config, &[("users", users.clone())]);

    let body = Body::from_stream(futures_util::stream::pending::<Result<Bytes, std::io::Error>>());
    let request = Request::post("/api/users/reg").body(body).unwrap();

    let started = tokio::time::Instant::now();
    let response = send(&gw.router, request).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json(response).await["error"], "deadline_exceeded");
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(users.calls(), 0);
}
