//! Gateway error taxonomy.
//!
//! Every failure that reaches a client is one of these variants. The
//! status code and the public message are derived here; backend detail
//! never leaves the process except through logs.

use axum::http::StatusCode;
use thiserror::Error;

use crate::upstream::rpc::{RpcCode, RpcError};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or missing input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Terminal backend error, or a transient one from a single attempt.
    #[error("backend error: {0}")]
    Backend(#[from] RpcError),

    /// Generated locally; the backend was not called.
    #[error("circuit open for service {service}")]
    CircuitOpen { service: String, retry_after_secs: u64 },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RpcError },

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Generated locally; the request was not forwarded.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Too many requests in flight gateway-wide.
    #[error("server capacity exceeded")]
    Overloaded,

    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Gateway-side fault unrelated to any backend.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Unauthorized(_) => StatusCode::FORBIDDEN,
            GatewayError::Backend(err) => backend_status(err.code),
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UnknownService(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_failed",
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Backend(err) => match err.code {
                RpcCode::InvalidArgument | RpcCode::OutOfRange => "validation_failed",
                RpcCode::Unauthenticated => "unauthenticated",
                RpcCode::PermissionDenied => "unauthorized",
                RpcCode::NotFound => "not_found",
                RpcCode::AlreadyExists => "already_exists",
                RpcCode::FailedPrecondition => "failed_precondition",
                RpcCode::DeadlineExceeded => "deadline_exceeded",
                code if code.is_retryable() => "unavailable",
                _ => "internal",
            },
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::RetriesExhausted { .. } => "retries_exhausted",
            GatewayError::DeadlineExceeded => "deadline_exceeded",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::Overloaded => "overloaded",
            GatewayError::UnknownService(_) | GatewayError::Internal(_) => "internal",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Client-caused errors echo their own detail; anything that originated
    /// behind the gateway gets a fixed phrase.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Validation(msg)
            | GatewayError::Unauthenticated(msg)
            | GatewayError::Unauthorized(msg) => msg.clone(),
            GatewayError::Backend(err) => match err.code {
                RpcCode::InvalidArgument
                | RpcCode::OutOfRange
                | RpcCode::NotFound
                | RpcCode::AlreadyExists
                | RpcCode::FailedPrecondition
                | RpcCode::PermissionDenied
                | RpcCode::Unauthenticated
                    if !err.message.is_empty() =>
                {
                    err.message.clone()
                }
                code if code.is_retryable() => "backend temporarily unavailable".to_string(),
                _ => "backend request failed".to_string(),
            },
            GatewayError::CircuitOpen { .. } => {
                "service temporarily unavailable, retry later".to_string()
            }
            GatewayError::RetriesExhausted { .. } => "backend request failed after retries".to_string(),
            GatewayError::DeadlineExceeded => "request deadline exceeded".to_string(),
            GatewayError::RateLimited => "too many requests".to_string(),
            GatewayError::Overloaded => "server capacity exceeded".to_string(),
            GatewayError::UnknownService(_) | GatewayError::Internal(_) => {
                "internal server error".to_string()
            }
        }
    }

    /// Whether the error was caused by the caller (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

fn backend_status(code: RpcCode) -> StatusCode {
    match code {
        RpcCode::InvalidArgument | RpcCode::OutOfRange => StatusCode::BAD_REQUEST,
        RpcCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        RpcCode::PermissionDenied => StatusCode::FORBIDDEN,
        RpcCode::NotFound => StatusCode::NOT_FOUND,
        RpcCode::AlreadyExists => StatusCode::CONFLICT,
        RpcCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        RpcCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        RpcCode::Cancelled
        | RpcCode::ResourceExhausted
        | RpcCode::Aborted
        | RpcCode::Unavailable
        | RpcCode::DataLoss => StatusCode::SERVICE_UNAVAILABLE,
        RpcCode::Unknown | RpcCode::Unimplemented | RpcCode::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
