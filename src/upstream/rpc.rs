//! RPC envelope exchanged with backend services.
//!
//! Every error a backend boundary can produce carries an [`RpcCode`] from a
//! closed set. The retry classifier is an exhaustive match over that set.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::request::{Identity, RequestId};

/// Machine-readable status of a failed backend call.
///
/// Mirrors the canonical RPC status codes (minus `Ok`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl RpcCode {
    /// Whether a call failing with this code may succeed if attempted again.
    pub fn is_retryable(self) -> bool {
        match self {
            RpcCode::Cancelled
            | RpcCode::DeadlineExceeded
            | RpcCode::ResourceExhausted
            | RpcCode::Aborted
            | RpcCode::Unavailable
            | RpcCode::DataLoss => true,
            RpcCode::Unknown
            | RpcCode::InvalidArgument
            | RpcCode::NotFound
            | RpcCode::AlreadyExists
            | RpcCode::PermissionDenied
            | RpcCode::FailedPrecondition
            | RpcCode::OutOfRange
            | RpcCode::Unimplemented
            | RpcCode::Internal
            | RpcCode::Unauthenticated => false,
        }
    }

    /// Map an HTTP status returned by a backend to a code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => RpcCode::InvalidArgument,
            401 => RpcCode::Unauthenticated,
            403 => RpcCode::PermissionDenied,
            404 => RpcCode::NotFound,
            408 => RpcCode::DeadlineExceeded,
            409 => RpcCode::AlreadyExists,
            412 => RpcCode::FailedPrecondition,
            416 => RpcCode::OutOfRange,
            429 => RpcCode::ResourceExhausted,
            499 => RpcCode::Cancelled,
            501 => RpcCode::Unimplemented,
            502 | 503 => RpcCode::Unavailable,
            504 => RpcCode::DeadlineExceeded,
            500..=599 => RpcCode::Internal,
            _ => RpcCode::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RpcCode::Cancelled => "cancelled",
            RpcCode::Unknown => "unknown",
            RpcCode::InvalidArgument => "invalid_argument",
            RpcCode::DeadlineExceeded => "deadline_exceeded",
            RpcCode::NotFound => "not_found",
            RpcCode::AlreadyExists => "already_exists",
            RpcCode::PermissionDenied => "permission_denied",
            RpcCode::ResourceExhausted => "resource_exhausted",
            RpcCode::FailedPrecondition => "failed_precondition",
            RpcCode::Aborted => "aborted",
            RpcCode::OutOfRange => "out_of_range",
            RpcCode::Unimplemented => "unimplemented",
            RpcCode::Internal => "internal",
            RpcCode::Unavailable => "unavailable",
            RpcCode::DataLoss => "data_loss",
            RpcCode::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: RpcCode,
    #[serde(default)]
    pub message: String,
}

impl RpcError {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Unavailable, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// A request for one backend operation.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    /// Operation name on the backend (e.g. `RegUser`).
    pub operation: String,
    /// Opaque JSON payload from the inbound request body.
    pub payload: serde_json::Value,
    /// Path parameters captured by the gateway route.
    pub params: BTreeMap<String, String>,
    /// Caller identity, once resolved.
    pub identity: Option<Identity>,
    pub session_key: Option<String>,
    pub request_id: RequestId,
}

impl RpcRequest {
    pub fn new(operation: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            operation: operation.into(),
            payload: serde_json::Value::Null,
            params: BTreeMap::new(),
            identity: None,
            session_key: None,
            request_id,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_session_key(mut self, session_key: Option<String>) -> Self {
        self.session_key = session_key;
        self
    }
}

/// Successful backend reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub payload: serde_json::Value,
}

impl RpcResponse {
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload }
    }

    /// Read a string field from an object payload.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}
