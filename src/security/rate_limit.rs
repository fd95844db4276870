//! Per-client fixed-window rate limiting.
//!
//! Each client address gets a counter `rl:<ip>` that lives for one window.
//! Requests past `max_requests` in the window are denied with 429 before any
//! other stage runs. A store that errors or stalls lets the request through.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use crate::http::request::RequestId;
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::store::CounterStore;

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    max_requests: u64,
    window: Duration,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            store_timeout: Duration::from_millis(config.store_timeout_ms),
        }
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn counter_key(client_key: &str) -> String {
        format!("rl:{client_key}")
    }

    /// Count one request for `client_key`; `false` once the window is used up.
    pub async fn allow(&self, client_key: &str) -> bool {
        let key = Self::counter_key(client_key);
        let counted =
            tokio::time::timeout(self.store_timeout, self.store.increment_in_window(&key, self.window))
                .await;

        match counted {
            Ok(Ok(count)) => count <= self.max_requests,
            Ok(Err(err)) => {
                tracing::warn!(client = %client_key, error = %err, "Rate limit store failed, allowing request");
                metrics::record_rate_limit_store_error();
                true
            }
            Err(_) => {
                tracing::warn!(
                    client = %client_key,
                    timeout = ?self.store_timeout,
                    "Rate limit store timed out, allowing request"
                );
                metrics::record_rate_limit_store_error();
                true
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// Client address from the connection, `unknown` when not served over TCP.
pub fn client_key(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Pipeline stage 1: deny clients over their window budget.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&request);

    if limiter.allow(&client).await {
        return next.run(request).await;
    }

    let request_id = RequestId::new();
    tracing::warn!(client = %client, request_id = %request_id, "Rate limit exceeded");
    metrics::record_rate_limited();
    ApiError::new(GatewayError::RateLimited, Some(request_id)).into_response()
}
