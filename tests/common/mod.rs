//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};

use api_gateway::config::GatewayConfig;
use api_gateway::http::{build_router, GatewayParts};
use api_gateway::resilience::RetryExecutor;
use api_gateway::security::{AuthResolver, BackendAuthResolver, MemoryCounterStore, RateLimiter};
use api_gateway::upstream::{
    BackendClient, Dispatcher, RpcCode, RpcError, RpcRequest, RpcResponse, ServiceRegistry,
};

type Reply = dyn Fn(&RpcRequest) -> Result<RpcResponse, RpcError> + Send + Sync;

/// In-process backend that records every request and answers from a closure.
pub struct MockBackend {
    reply: Box<Reply>,
    calls: AtomicU32,
    requests: Mutex<Vec<RpcRequest>>,
}

impl MockBackend {
    pub fn new<F>(reply: F) -> Arc<Self>
    where
        F: Fn(&RpcRequest) -> Result<RpcResponse, RpcError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            reply: Box::new(reply),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Echoes the operation, params and identity back as JSON.
    pub fn echo() -> Arc<Self> {
        Self::new(|req| {
            Ok(RpcResponse::new(serde_json::json!({
                "operation": req.operation,
                "params": req.params,
                "identity": req.identity,
            })))
        })
    }

    pub fn failing(code: RpcCode) -> Arc<Self> {
        Self::new(move |_| Err(RpcError::new(code, "injected failure")))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RpcRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        (self.reply)(request)
    }

    async fn close(&self) -> Result<(), RpcError> {
        Ok(())
    }
}

/// Backend whose calls block until [`GatedBackend::open`] is called.
pub struct GatedBackend {
    gate: Semaphore,
    pub entered: Notify,
}

impl GatedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            entered: Notify::new(),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl BackendClient for GatedBackend {
    async fn call(&self, _request: &RpcRequest) -> Result<RpcResponse, RpcError> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| RpcError::new(RpcCode::Unavailable, "gate closed"))?;
        Ok(RpcResponse::new(serde_json::json!({ "gated": true })))
    }

    async fn close(&self) -> Result<(), RpcError> {
        Ok(())
    }
}

/// Users backend that resolves any credentials to `user-1` / `admin`.
pub fn users_backend() -> Arc<MockBackend> {
    MockBackend::new(|req| match req.operation.as_str() {
        "ExtJWTData" => Ok(RpcResponse::new(serde_json::json!({
            "user_id": "user-1",
            "role": "admin",
        }))),
        "LogUser" => Ok(RpcResponse::new(serde_json::json!({
            "token": "jwt-token",
            "session_key": "sess-1",
        }))),
        _ => Ok(RpcResponse::new(serde_json::json!({ "operation": req.operation }))),
    })
}

/// Config with fast retries so failure tests finish quickly.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.retries.base_delay_ms = 10;
    config
}

pub struct TestGateway {
    pub router: Router,
    pub dispatcher: Dispatcher,
}

/// Router over in-process backends, with the full pipeline enabled.
pub fn gateway(config: &GatewayConfig, backends: &[(&str, Arc<MockBackend>)]) -> TestGateway {
    let backends: Vec<(&str, Arc<dyn BackendClient>)> = backends
        .iter()
        .map(|(name, backend)| (*name, backend.clone() as Arc<dyn BackendClient>))
        .collect();
    gateway_with(config, &backends)
}

/// Like [`gateway`], for any backend client.
pub fn gateway_with(config: &GatewayConfig, backends: &[(&str, Arc<dyn BackendClient>)]) -> TestGateway {
    let mut registry = ServiceRegistry::new();
    for (name, backend) in backends {
        let routes = config
            .service(name)
            .map(|s| s.routes.clone())
            .unwrap_or_default();
        registry.register(*name, backend.clone(), &config.circuit_breaker, routes);
    }
    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        RetryExecutor::from_config(&config.retries),
    );

    let rate_limiter = config.rate_limit.enabled.then(|| {
        Arc::new(RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            &config.rate_limit,
        ))
    });
    let auth = config.auth.enabled.then(|| {
        Arc::new(BackendAuthResolver::new(dispatcher.clone(), &config.auth)) as Arc<dyn AuthResolver>
    });

    let router = build_router(
        config,
        GatewayParts {
            dispatcher: dispatcher.clone(),
            rate_limiter,
            auth,
            metrics: None,
        },
    );
    TestGateway { router, dispatcher }
}

/// Request captured by [`start_http_backend`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Start a programmable raw-TCP HTTP backend on an ephemeral port.
///
/// `f` maps each request to `(status, body)`.
pub async fn start_http_backend<F>(f: F) -> (SocketAddr, Arc<Mutex<Vec<CapturedRequest>>>)
where
    F: Fn(&CapturedRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let log = seen.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let (status, body) = f(&request);
                log.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });

    (addr, seen)
}

async fn read_request(socket: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut start = lines.next()?.split(' ');
    let method = start.next()?.to_string();
    let path = start.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = buf.len().min(header_end + length);
    let body = String::from_utf8_lossy(&buf[header_end..end]).into_owned();

    Some(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
