//! Error responses.
//!
//! # Responsibilities
//! - Map a [`GatewayError`] to its status code and JSON body
//! - Attach the correlation id to the body and the `x-request-id` header
//! - Log the full error server-side; the body carries only the safe message
//!
//! ```text
//! { "error": "circuit_open", "message": "...", "request_id": "..." }
//! ```

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::GatewayError;
use crate::http::request::{RequestId, X_REQUEST_ID};

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    request_id: Option<&'a str>,
}

/// A [`GatewayError`] bound to the request it failed.
#[derive(Debug)]
pub struct ApiError {
    pub error: GatewayError,
    pub request_id: Option<RequestId>,
}

impl ApiError {
    pub fn new(error: GatewayError, request_id: Option<RequestId>) -> Self {
        Self { error, request_id }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let request_id = self.request_id.as_ref().map(RequestId::as_str).unwrap_or("");

        if status.is_server_error() {
            tracing::warn!(
                request_id = %request_id,
                status = status.as_u16(),
                error = %self.error,
                "Request failed"
            );
        } else {
            tracing::debug!(
                request_id = %request_id,
                status = status.as_u16(),
                error = %self.error,
                "Request rejected"
            );
        }

        let body = ErrorBody {
            error: self.error.code(),
            message: self.error.public_message(),
            request_id: self.request_id.as_ref().map(RequestId::as_str),
        };
        let mut response = (status, Json(body)).into_response();

        if let Some(value) = self.request_id.as_ref().and_then(RequestId::header_value) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        if let GatewayError::CircuitOpen { retry_after_secs, .. } = self.error {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs.max(1)));
        }
        response
    }
}

/// Structured 404 for unmatched routes.
pub fn not_found(request_id: Option<RequestId>) -> Response {
    let body = ErrorBody {
        error: "not_found",
        message: "no route matches this path".to_string(),
        request_id: request_id.as_ref().map(RequestId::as_str),
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
