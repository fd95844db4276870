//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: configured backend routes under `/api/<service>`,
//!   `/`, `/metrics` and a JSON 404 fallback
//! - Wire up the request pipeline in its fixed order
//! - Bind to the listener and drain on shutdown
//!
//! # Pipeline
//! ```text
//! TraceLayer → body limit
//!     → rate_limit    (429, nothing else runs)
//!     → cors          (preflights answered here)
//!     → compression
//!     → request_id    (RequestContext, x-request-id)
//!     → throttle      (503 over capacity, 504 past the response timeout)
//!     → catch_panic   (structured 500)
//!     → auth          (public routes skip)
//!     → metrics       (OperationGuard)
//!     → handler       (Dispatcher → breaker → retries → backend)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    error_handling::HandleErrorLayer,
    extract::{Path, State},
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, MethodFilter, MethodRouter},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::{limit::GlobalConcurrencyLimitLayer, ServiceBuilder};
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::http::handlers::{self, AppState, RouteTarget};
use crate::http::middleware::{compression_layer, cors_layer, panic_response, throttle_error};
use crate::http::request::{request_id_middleware, RequestContext, RequestIdState};
use crate::observability::{metrics::metrics_middleware, LabelPolicy};
use crate::security::{auth_middleware, rate_limit_middleware, AuthResolver, AuthState, RateLimiter};
use crate::upstream::Dispatcher;

/// Collaborators the server is assembled from.
pub struct GatewayParts {
    pub dispatcher: Dispatcher,
    /// `None` disables rate limiting.
    pub rate_limiter: Option<Arc<RateLimiter>>,
    /// `None` disables auth resolution.
    pub auth: Option<Arc<dyn AuthResolver>>,
    /// `None` disables `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig, parts: GatewayParts) -> Self {
        Self {
            router: build_router(config, parts),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(config: &GatewayConfig, parts: GatewayParts) -> Router {
    let state = AppState {
        dispatcher: parts.dispatcher.clone(),
        metrics: parts.metrics,
        secure_cookies: config.security.secure_cookies,
    };

    let mut router = Router::new().route("/", get(handlers::root));
    if config.observability.metrics_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }
    for (path, method_router) in backend_routes(&parts.dispatcher) {
        router = router.route(&path, method_router);
    }

    let labels = LabelPolicy::new(
        parts
            .dispatcher
            .registry()
            .entries()
            .map(|entry| entry.name.clone()),
    );
    let mut router = router
        .fallback(handlers::fallback)
        .with_state(state)
        .layer(from_fn_with_state(labels, metrics_middleware));

    if let Some(resolver) = parts.auth {
        let auth = AuthState::new(resolver, &config.auth.public_routes);
        router = router.layer(from_fn_with_state(auth, auth_middleware));
    }

    router = router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(throttle_error))
                .load_shed()
                .layer(GlobalConcurrencyLimitLayer::new(
                    config.server.max_concurrent_requests,
                ))
                .timeout(Duration::from_secs(config.server.response_timeout_secs)),
        );

    let request_id = RequestIdState {
        request_timeout: Duration::from_secs(config.timeouts.request_secs),
    };
    router = router
        .layer(from_fn_with_state(request_id, request_id_middleware))
        .layer(compression_layer(&config.server));

    if config.cors.enabled {
        router = router.layer(cors_layer(&config.cors));
    }

    if let Some(limiter) = parts.rate_limiter {
        router = router.layer(from_fn_with_state(limiter, rate_limit_middleware));
    }

    router
        .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
        .layer(TraceLayer::new_for_http())
}

/// One method router per full path, across every registered service.
fn backend_routes(dispatcher: &Dispatcher) -> BTreeMap<String, MethodRouter<AppState>> {
    let mut routes: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();

    for entry in dispatcher.registry().entries() {
        for route in &entry.routes {
            let filter = match Method::from_bytes(route.method.to_uppercase().as_bytes())
                .ok()
                .and_then(|m| MethodFilter::try_from(m).ok())
            {
                Some(filter) => filter,
                None => {
                    tracing::warn!(
                        service = %entry.name,
                        method = %route.method,
                        path = %route.path,
                        "Skipping route with unsupported method"
                    );
                    continue;
                }
            };

            let target = Arc::new(RouteTarget {
                service: entry.name.clone(),
                operation: route.operation.clone(),
            });

            let mount = format!("/api/{}", entry.name);
            let paths = if route.path == "/" {
                vec![mount.clone(), format!("{mount}/")]
            } else {
                vec![format!("{mount}{}", route.path)]
            };

            for path in paths {
                let target = target.clone();
                let handler = move |State(state): State<AppState>,
                                    ctx: RequestContext,
                                    params: Option<Path<HashMap<String, String>>>,
                                    body: Bytes| {
                    let target = target.clone();
                    async move { handlers::forward(state, target, ctx, params, body).await }
                };
                let method_router = routes.remove(&path).unwrap_or_default();
                routes.insert(path, method_router.on(filter, handler));
            }
        }
    }
    routes
}
