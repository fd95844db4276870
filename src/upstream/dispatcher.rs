//! Outbound call dispatch.
//!
//! # Data Flow
//! ```text
//! call(service, ctx, request)
//!     → registry lookup (unknown → UnknownService)
//!     → breaker.execute(
//!           retry.run(ctx.deadline,
//!               client.call(request)))
//!     → map BreakerError / RetryError → GatewayError
//! ```

use std::sync::Arc;

use crate::error::GatewayError;
use crate::http::request::RequestContext;
use crate::observability::metrics;
use crate::resilience::{BreakerError, RetryError, RetryExecutor};
use crate::upstream::registry::ServiceRegistry;
use crate::upstream::rpc::{RpcRequest, RpcResponse};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    retry: RetryExecutor,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceRegistry>, retry: RetryExecutor) -> Self {
        Self { registry, retry }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Call `request.operation` on `service` through its breaker and the retry loop.
    pub async fn call(
        &self,
        service: &str,
        ctx: &RequestContext,
        request: RpcRequest,
    ) -> Result<RpcResponse, GatewayError> {
        let entry = self
            .registry
            .get(service)
            .ok_or_else(|| GatewayError::UnknownService(service.to_string()))?;
        let client = entry.client.clone();

        let result = entry
            .breaker
            .execute(|| {
                self.retry.run_with(
                    ctx.deadline,
                    || client.call(&request),
                    |attempt, err| {
                        metrics::record_backend_retry(service);
                        tracing::warn!(
                            request_id = %ctx.request_id,
                            service = %service,
                            operation = %request.operation,
                            attempt,
                            error = %err,
                            "Backend call failed, retrying"
                        );
                    },
                )
            })
            .await;

        result.map_err(|err| {
            let mapped = match err {
                BreakerError::Open { .. } => GatewayError::CircuitOpen {
                    service: service.to_string(),
                    retry_after_secs: entry.breaker.retry_after().as_secs(),
                },
                BreakerError::Inner(RetryError::Terminal(err)) => GatewayError::Backend(err),
                BreakerError::Inner(RetryError::Exhausted { attempts, last }) if attempts <= 1 => {
                    GatewayError::Backend(last)
                }
                BreakerError::Inner(RetryError::Exhausted { attempts, last }) => {
                    GatewayError::RetriesExhausted { attempts, last }
                }
                BreakerError::Inner(RetryError::DeadlineExceeded { .. }) => {
                    GatewayError::DeadlineExceeded
                }
            };
            tracing::debug!(
                request_id = %ctx.request_id,
                service = %service,
                operation = %request.operation,
                error = %mapped,
                "Backend call failed"
            );
            mapped
        })
    }
}
