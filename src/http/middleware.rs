//! Server-wide layers that are not pipeline stages of their own.
//!
//! # Responsibilities
//! - CORS, answered before auth so preflights need no credentials
//! - Response compression
//! - Gateway-wide concurrency cap and whole-response timeout
//! - Turning a handler panic into a structured 500
//!
//! Every response these layers produce leaves through the request-id
//! stage, so it carries `x-request-id` like any other.

use std::any::Any;
use std::time::Duration;

use axum::{
    http::{HeaderName, HeaderValue, Method},
    response::{IntoResponse, Response},
    BoxError,
};
use tower::{load_shed::error::Overloaded, timeout::error::Elapsed};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    CompressionLevel,
};

use crate::config::{CorsConfig, ServerConfig};
use crate::error::GatewayError;
use crate::http::request::{RequestContext, X_REQUEST_ID};
use crate::http::response::ApiError;

const WILDCARD: &str = "*";

/// CORS policy from config. `"*"` mirrors the request, which stays valid
/// when credentials are allowed.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins = if config.allowed_origins.iter().any(|o| o == WILDCARD) {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    let methods = if config.allowed_methods.iter().any(|m| m == WILDCARD) {
        AllowMethods::mirror_request()
    } else {
        AllowMethods::list(
            config
                .allowed_methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.to_uppercase().as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(config.allow_credentials)
        .expose_headers([HeaderName::from_static(X_REQUEST_ID)])
        .max_age(Duration::from_secs(config.max_age_secs))
}

pub fn compression_layer(config: &ServerConfig) -> CompressionLayer {
    let level = i32::try_from(config.compression_level).unwrap_or(i32::MAX);
    CompressionLayer::new().quality(CompressionLevel::Precise(level))
}

/// Maps load-shed and timeout errors from the throttle stack.
pub async fn throttle_error(ctx: RequestContext, err: BoxError) -> ApiError {
    let error = if err.is::<Overloaded>() {
        GatewayError::Overloaded
    } else if err.is::<Elapsed>() {
        GatewayError::DeadlineExceeded
    } else {
        GatewayError::Internal(err.to_string())
    };
    ApiError::new(error, Some(ctx.request_id))
}

pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    tracing::error!(panic = %detail, "Handler panicked");

    ApiError::new(GatewayError::Internal("handler panicked".to_string()), None).into_response()
}
