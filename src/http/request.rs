//! Request identification and per-request context.
//!
//! # Responsibilities
//! - Assign a correlation id to every request (adopt a well-formed inbound
//!   `x-request-id`, otherwise generate a UUID v4)
//! - Fix the request deadline at ingress
//! - Read the session key cookie
//! - Carry the resolved identity to handlers as a typed [`RequestContext`]
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The context lives in request extensions; later stages mutate it in place
//! - Every response leaving this stage carries `x-request-id`

use std::fmt;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::http::response::ApiError;
use crate::resilience::Deadline;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const SESSION_COOKIE: &str = "session_key";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id attached to a request, its logs and its backend calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Adopt an inbound id if it is short and made of safe characters.
    pub fn parse(value: &str) -> Option<Self> {
        let well_formed = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        well_formed.then(|| Self(value.to_string()))
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller identity resolved from credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    pub role: String,
}

/// Everything later stages and handlers know about the current request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    /// Set once by auth resolution; `None` on public routes.
    pub identity: Option<Identity>,
    pub session_key: Option<String>,
    pub deadline: Deadline,
}

impl RequestContext {
    pub fn new(request_id: RequestId, deadline: Deadline) -> Self {
        Self {
            request_id,
            identity: None,
            session_key: None,
            deadline,
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or_else(|| {
            ApiError::new(
                GatewayError::Internal("request context missing".to_string()),
                RequestId::from_headers(&parts.headers),
            )
        })
    }
}

/// Value of cookie `name` across all `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Settings for the request-id stage.
#[derive(Debug, Clone)]
pub struct RequestIdState {
    pub request_timeout: Duration,
}

/// Pipeline stage 2: attach a [`RequestContext`] and echo the id.
pub async fn request_id_middleware(
    State(state): State<RequestIdState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = RequestId::from_headers(req.headers()).unwrap_or_default();

    let mut ctx = RequestContext::new(request_id.clone(), Deadline::after(state.request_timeout));
    ctx.session_key = cookie_value(req.headers(), SESSION_COOKIE);
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Some(value) = request_id.header_value() {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}
