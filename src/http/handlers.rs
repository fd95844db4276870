//! Route handlers.
//!
//! Every configured backend route is served by [`forward`]: the JSON body and
//! path parameters become an [`RpcRequest`] for the route's operation, and
//! the backend payload comes back as the response body.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::error::GatewayError;
use crate::http::request::{RequestContext, SESSION_COOKIE};
use crate::http::response::{self, ApiError};
use crate::upstream::{Dispatcher, RpcRequest};

/// Session cookie lifetime in seconds.
pub const SESSION_MAX_AGE: u64 = 24 * 60 * 60;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub metrics: Option<PrometheusHandle>,
    pub secure_cookies: bool,
}

/// Backend service and operation a route forwards to.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub service: String,
    pub operation: String,
}

pub async fn forward(
    state: AppState,
    target: Arc<RouteTarget>,
    ctx: RequestContext,
    params: Option<Path<HashMap<String, String>>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let fail = |error: GatewayError| ApiError::new(error, Some(ctx.request_id.clone()));

    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| fail(GatewayError::Validation(format!("invalid JSON body: {e}"))))?
    };
    let params: BTreeMap<String, String> = params
        .map(|Path(params)| params.into_iter().collect())
        .unwrap_or_default();

    tracing::info!(
        request_id = %ctx.request_id,
        service = %target.service,
        operation = %target.operation,
        "New request"
    );

    let request = RpcRequest::new(target.operation.clone(), ctx.request_id.clone())
        .with_payload(payload)
        .with_params(params)
        .with_identity(ctx.identity.clone())
        .with_session_key(ctx.session_key.clone());

    let mut reply = state
        .dispatcher
        .call(&target.service, &ctx, request)
        .await
        .map_err(fail)?
        .payload;

    let session_key = reply
        .as_object_mut()
        .and_then(|obj| {
            if obj.get(SESSION_COOKIE).is_some_and(serde_json::Value::is_string) {
                obj.remove(SESSION_COOKIE)
            } else {
                None
            }
        })
        .and_then(|v| v.as_str().map(str::to_string));

    let mut response = (StatusCode::OK, Json(reply)).into_response();
    if let Some(session_key) = session_key {
        let cookie = session_cookie(&session_key, state.secure_cookies).ok_or_else(|| {
            fail(GatewayError::Internal("backend issued an invalid session key".to_string()))
        })?;
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

/// `Set-Cookie` value for a session key; `None` if it is not a valid header.
pub fn session_cookie(session_key: &str, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={session_key}; Path=/; Max-Age={SESSION_MAX_AGE}; HttpOnly; SameSite=Lax{secure}"
    ))
    .ok()
}

pub async fn root() -> &'static str {
    "root"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => response::not_found(None),
    }
}

pub async fn fallback(ctx: RequestContext) -> Response {
    response::not_found(Some(ctx.request_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_attributes() {
        let cookie = session_cookie("abc", false).unwrap();
        assert_eq!(
            cookie,
            "session_key=abc; Path=/; Max-Age=86400; HttpOnly; SameSite=Lax"
        );
        let secure = session_cookie("abc", true).unwrap();
        assert!(secure.to_str().unwrap().ends_with("; Secure"));
    }

    #[test]
    fn invalid_session_key_is_rejected() {
        assert!(session_cookie("bad\nkey", false).is_none());
    }
}
