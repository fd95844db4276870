//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (auth resolves through a configured service)
//! - Validate value ranges (timeouts > 0, thresholds > 0, addresses parse)
//! - Detect duplicate services and conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::{HeaderValue, Method};
use thiserror::Error;

use crate::config::schema::{GatewayConfig, RateLimitStoreKind, ServiceConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// One semantic problem, located by its dotted config path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    positive(&mut errors, "timeouts.connect_secs", config.timeouts.connect_secs);
    positive(&mut errors, "timeouts.request_secs", config.timeouts.request_secs);

    let server = &config.server;
    if server.max_concurrent_requests == 0 {
        errors.push(ValidationError::new(
            "server.max_concurrent_requests",
            "must be greater than 0",
        ));
    }
    if !(1..=9).contains(&server.compression_level) {
        errors.push(ValidationError::new("server.compression_level", "must be between 1 and 9"));
    }
    if server.response_timeout_secs < config.timeouts.request_secs {
        errors.push(ValidationError::new(
            "server.response_timeout_secs",
            "must not be shorter than timeouts.request_secs",
        ));
    }

    if config.cors.enabled {
        for (i, origin) in config.cors.allowed_origins.iter().enumerate() {
            if origin != "*" && HeaderValue::from_str(origin).is_err() {
                errors.push(ValidationError::new(
                    format!("cors.allowed_origins[{i}]"),
                    format!("invalid origin '{origin}'"),
                ));
            }
        }
        for (i, method) in config.cors.allowed_methods.iter().enumerate() {
            if method != "*" && Method::from_bytes(method.to_uppercase().as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    format!("cors.allowed_methods[{i}]"),
                    format!("invalid method '{method}'"),
                ));
            }
        }
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        positive(&mut errors, "rate_limit.max_requests", rl.max_requests);
        positive(&mut errors, "rate_limit.window_secs", rl.window_secs);
        positive(&mut errors, "rate_limit.store_timeout_ms", rl.store_timeout_ms);
        if rl.store == RateLimitStoreKind::Redis
            && !(rl.redis_url.starts_with("redis://") || rl.redis_url.starts_with("rediss://"))
        {
            errors.push(ValidationError::new(
                "rate_limit.redis_url",
                "must start with redis:// or rediss://",
            ));
        }
    }

    let cb = &config.circuit_breaker;
    positive(&mut errors, "circuit_breaker.failure_threshold", cb.failure_threshold.into());
    positive(&mut errors, "circuit_breaker.open_timeout_ms", cb.open_timeout_ms);
    positive(
        &mut errors,
        "circuit_breaker.half_open_max_requests",
        cb.half_open_max_requests.into(),
    );

    positive(&mut errors, "retries.max_retries", config.retries.max_retries.into());

    if !LOG_LEVELS.contains(&config.observability.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }

    positive(&mut errors, "shutdown.timeout_secs", config.shutdown.timeout_secs);

    let mut names = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("services[{i}].name"),
                format!("duplicate service '{}'", service.name),
            ));
        }
        validate_service(&mut errors, i, service);
    }

    if config.auth.enabled {
        if config.service(&config.auth.service).is_none() {
            errors.push(ValidationError::new(
                "auth.service",
                format!("service '{}' is not configured", config.auth.service),
            ));
        }
        if config.auth.operation.is_empty() {
            errors.push(ValidationError::new("auth.operation", "must not be empty"));
        }
        for (i, route) in config.auth.public_routes.iter().enumerate() {
            if !route.starts_with('/') {
                errors.push(ValidationError::new(
                    format!("auth.public_routes[{i}]"),
                    "must start with '/'",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(errors: &mut Vec<ValidationError>, i: usize, service: &ServiceConfig) {
    let prefix = format!("services[{i}]");

    if service.name.is_empty() || service.name.contains('/') {
        errors.push(ValidationError::new(
            format!("{prefix}.name"),
            "must be a non-empty path segment",
        ));
    }

    let port_ok = service
        .address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !port_ok {
        errors.push(ValidationError::new(
            format!("{prefix}.address"),
            format!("'{}' is not host:port", service.address),
        ));
    }

    let mut seen = HashSet::new();
    for (j, route) in service.routes.iter().enumerate() {
        let field = format!("{prefix}.routes[{j}]");
        let method = route.method.to_uppercase();

        if Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                format!("{field}.method"),
                format!("invalid method '{}'", route.method),
            ));
        }
        if !route.path.starts_with('/') {
            errors.push(ValidationError::new(format!("{field}.path"), "must start with '/'"));
        }
        if route.operation.is_empty() {
            errors.push(ValidationError::new(format!("{field}.operation"), "must not be empty"));
        }
        if !seen.insert((method, route.path.as_str())) {
            errors.push(ValidationError::new(
                field,
                format!("duplicate route {} {}", route.method, route.path),
            ));
        }
    }
}

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    }
}
