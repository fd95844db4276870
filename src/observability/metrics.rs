//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus recorder once per process
//! - Time every request by `(service, operation)` label pair
//! - Record breaker, retry and rate-limit events
//!
//! # Metrics
//! - `gateway_service_operations_total` (counter): requests by service
//! - `gateway_operations_total` (counter): requests by service, operation
//! - `gateway_operation_duration_seconds` (histogram): latency distribution
//! - `gateway_active_operations` (gauge): in-flight requests by service
//! - `gateway_circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_circuit_breaker_rejections_total` (counter): calls failed fast
//! - `gateway_backend_retries_total` (counter): retry attempts by service
//! - `gateway_rate_limited_total` (counter): requests denied with 429
//! - `gateway_rate_limit_store_errors_total` (counter): fail-open decisions
//!
//! # Design Decisions
//! - Free functions over the `metrics` facade; no-ops until a recorder exists
//! - The in-flight gauge and the timer are released by a drop guard, so a
//!   cancelled request is still accounted for

use std::sync::{Mutex, PoisonError};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::time::Instant;

use crate::observability::labels::{LabelPolicy, OperationLabels};
use crate::resilience::CircuitState;

pub const OPERATION_DURATION: &str = "gateway_operation_duration_seconds";
const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0];

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the Prometheus recorder, or return the one already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let mut slot = HANDLE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(OPERATION_DURATION.to_string()), DURATION_BUCKETS)?
        .install_recorder()?;
    describe_metrics();

    *slot = Some(handle.clone());
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("gateway_service_operations_total", "Requests handled per service");
    describe_counter!("gateway_operations_total", "Requests handled per service and operation");
    describe_histogram!(OPERATION_DURATION, "Request duration in seconds");
    describe_gauge!("gateway_active_operations", "Requests currently in flight");
    describe_gauge!(
        "gateway_circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(
        "gateway_circuit_breaker_rejections_total",
        "Calls rejected by an open circuit breaker"
    );
    describe_counter!("gateway_backend_retries_total", "Backend call retries");
    describe_counter!("gateway_rate_limited_total", "Requests denied by the rate limiter");
    describe_counter!(
        "gateway_rate_limit_store_errors_total",
        "Rate limit store failures (request allowed)"
    );
}

/// Tracks one in-flight request; records duration and releases the gauge on drop.
#[derive(Debug)]
pub struct OperationGuard {
    labels: OperationLabels,
    start: Instant,
}

impl OperationGuard {
    pub fn start(labels: OperationLabels) -> Self {
        counter!("gateway_service_operations_total", "service" => labels.service.clone())
            .increment(1);
        counter!(
            "gateway_operations_total",
            "service" => labels.service.clone(),
            "operation" => labels.operation.clone()
        )
        .increment(1);
        gauge!("gateway_active_operations", "service" => labels.service.clone()).increment(1.0);

        Self {
            labels,
            start: Instant::now(),
        }
    }

    pub fn labels(&self) -> &OperationLabels {
        &self.labels
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        histogram!(
            OPERATION_DURATION,
            "service" => self.labels.service.clone(),
            "operation" => self.labels.operation.clone()
        )
        .record(self.start.elapsed().as_secs_f64());
        gauge!("gateway_active_operations", "service" => self.labels.service.clone())
            .decrement(1.0);
    }
}

/// Pipeline stage 4: instrument the request by its derived labels.
pub async fn metrics_middleware(
    State(policy): State<LabelPolicy>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let labels = policy.derive(req.method(), req.uri().path());
    let _guard = OperationGuard::start(labels);
    next.run(req).await
}

pub fn record_breaker_state(service: &str, state: CircuitState) {
    gauge!("gateway_circuit_breaker_state", "service" => service.to_string())
        .set(state.as_gauge());
}

pub fn record_breaker_rejection(service: &str) {
    counter!("gateway_circuit_breaker_rejections_total", "service" => service.to_string())
        .increment(1);
}

pub fn record_backend_retry(service: &str) {
    counter!("gateway_backend_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_rate_limited() {
    counter!("gateway_rate_limited_total").increment(1);
}

pub fn record_rate_limit_store_error() {
    counter!("gateway_rate_limit_store_errors_total").increment(1);
}
