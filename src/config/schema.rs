//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Whole-server limits: concurrency, compression, response timeout.
    pub server: ServerConfig,

    pub cors: CorsConfig,

    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker settings, applied to every backend service.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Auth resolution settings.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub security: SecurityConfig,

    /// Backend services and the routes mounted under `/api/<name>`.
    pub services: Vec<ServiceConfig>,

    pub shutdown: ShutdownConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            server: ServerConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retries: RetryConfig::default(),
            auth: AuthConfig::default(),
            observability: ObservabilityConfig::default(),
            security: SecurityConfig::default(),
            services: default_services(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request deadline, fixed at ingress, in seconds.
    pub request_secs: u64,

    /// Idle backend connection timeout in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
        }
    }
}

/// Server-wide request handling limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Requests handled at once; the rest are rejected with 503.
    pub max_concurrent_requests: usize,

    /// gzip level for compressed responses (1-9).
    pub compression_level: u32,

    /// Upper bound on producing a whole response, in seconds.
    pub response_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            compression_level: 5,
            response_timeout_secs: 60,
        }
    }
}

/// Cross-origin resource sharing. `"*"` mirrors the request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,

    pub allowed_origins: Vec<String>,

    pub allowed_methods: Vec<String>,

    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["*".to_string()],
            allow_credentials: true,
            max_age_secs: 3600,
        }
    }
}

/// Where rate-limit counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStoreKind {
    /// Process-local counters.
    Memory,
    /// Counters shared by every gateway instance.
    Redis,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per client per window.
    pub max_requests: u64,

    /// Fixed window length in seconds.
    pub window_secs: u64,

    pub store: RateLimitStoreKind,

    /// Redis connection URL, used when `store = "redis"`.
    pub redis_url: String,

    /// Upper bound on one counter store round-trip in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 50,
            window_secs: 60,
            store: RateLimitStoreKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            store_timeout_ms: 250,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing, in milliseconds.
    pub open_timeout_ms: u64,

    /// Probe budget while half-open; also the successes needed to close.
    pub half_open_max_requests: u32,

    /// Closed-state counters reset after this many milliseconds. Zero disables.
    pub rolling_interval_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 6,
            open_timeout_ms: 5 * 60 * 1000,
            half_open_max_requests: 5,
            rolling_interval_ms: 60 * 1000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_retries: u32,

    /// Linear backoff step in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Auth resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,

    /// Backend service that resolves credentials.
    pub service: String,

    /// Operation invoked on that service.
    pub operation: String,

    /// Exact paths that skip auth resolution.
    pub public_routes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service: "users".to_string(),
            operation: "ExtJWTData".to_string(),
            public_routes: vec![
                "/api/users/reg".to_string(),
                "/api/users/log".to_string(),
                "/metrics".to_string(),
                "/".to_string(),
            ],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Serve `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,

    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
            secure_cookies: false,
        }
    }
}

/// A backend service reachable over HTTP/JSON RPC.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name; also the `/api/<name>` mount point.
    pub name: String,

    /// Backend address (e.g., "127.0.0.1:50051").
    pub address: String,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// One HTTP route forwarded to a backend operation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// HTTP method (GET, POST, DELETE, ...).
    pub method: String,

    /// Path relative to the service mount, axum syntax (`/del/{id}`).
    pub path: String,

    /// Backend operation name.
    pub operation: String,
}

impl RouteConfig {
    pub fn new(method: &str, path: &str, operation: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            operation: operation.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Deadline for draining and closing everything, in seconds.
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            name: "users".to_string(),
            address: "127.0.0.1:50051".to_string(),
            routes: vec![
                RouteConfig::new("POST", "/reg", "RegUser"),
                RouteConfig::new("POST", "/log", "LogUser"),
                RouteConfig::new("DELETE", "/del/{delUserId}", "DelUser"),
                RouteConfig::new("GET", "/extUserId/{token}", "ExtUserId"),
            ],
        },
        ServiceConfig {
            name: "orders".to_string(),
            address: "127.0.0.1:50052".to_string(),
            routes: vec![
                RouteConfig::new("POST", "/", "AddOrder"),
                RouteConfig::new("GET", "/{orderID}", "OrderInfo"),
                RouteConfig::new("DELETE", "/del/{orderID}", "DelOrder"),
            ],
        },
    ]
}
