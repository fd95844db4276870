//! Backend transport.
//!
//! # Responsibilities
//! - Define the [`BackendClient`] seam the dispatcher calls through
//! - Provide [`HttpBackend`]: the RPC envelope as JSON over HTTP/1.1
//! - Map every transport or backend failure to an [`RpcCode`]
//!
//! # Wire format
//! ```text
//! POST http://<address>/rpc/<operation>
//! x-request-id: <id>
//! { "operation", "payload", "params", "identity", "session_key", "request_id" }
//!
//! 2xx → response body is the payload (empty → null)
//! else → {"code": "...", "message": "..."} if present, otherwise status mapping
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::TimeoutConfig;
use crate::http::request::X_REQUEST_ID;
use crate::upstream::rpc::{RpcCode, RpcError, RpcRequest, RpcResponse};

/// Largest backend response body accepted.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// A connection to one backend service.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Perform one attempt of `request`.
    async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, RpcError>;

    /// Release connections. Later calls fail with `Unavailable`.
    async fn close(&self) -> Result<(), RpcError>;
}

/// JSON-over-HTTP backend client.
pub struct HttpBackend {
    name: String,
    base_url: String,
    client: Mutex<Option<Client<HttpConnector, Body>>>,
    closed: AtomicBool,
}

impl HttpBackend {
    pub fn new(name: impl Into<String>, address: &str, timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .build(connector);

        Self {
            name: name.into(),
            base_url: format!("http://{address}"),
            client: Mutex::new(Some(client)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn client(&self) -> Result<Client<HttpConnector, Body>, RpcError> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        client.ok_or_else(|| RpcError::unavailable(format!("{} client closed", self.name)))
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, RpcError> {
        let client = self.client()?;

        let body = serde_json::to_vec(request)
            .map_err(|e| RpcError::new(RpcCode::Internal, format!("encode request: {e}")))?;

        let http_request = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/rpc/{}", self.base_url, request.operation))
            .header(header::CONTENT_TYPE, "application/json")
            .header(X_REQUEST_ID, request.request_id.as_str())
            .body(Body::from(body))
            .map_err(|e| RpcError::new(RpcCode::InvalidArgument, format!("build request: {e}")))?;

        let response = client.request(http_request).await.map_err(|e| {
            tracing::debug!(
                service = %self.name,
                request_id = %request.request_id,
                error = %e,
                "Backend connection failed"
            );
            RpcError::unavailable(format!("{}: {e}", self.name))
        })?;

        let status = response.status();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| RpcError::unavailable(format!("read response: {e}")))?;

        if status.is_success() {
            if bytes.is_empty() {
                return Ok(RpcResponse::new(serde_json::Value::Null));
            }
            let payload = serde_json::from_slice(&bytes)
                .map_err(|e| RpcError::new(RpcCode::Internal, format!("decode response: {e}")))?;
            return Ok(RpcResponse::new(payload));
        }

        Err(serde_json::from_slice::<RpcError>(&bytes).unwrap_or_else(|_| {
            RpcError::new(
                RpcCode::from_http_status(status.as_u16()),
                String::from_utf8_lossy(&bytes).into_owned(),
            )
        }))
    }

    async fn close(&self) -> Result<(), RpcError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!(service = %self.name, "Backend client closed");
        Ok(())
    }
}
