//! Auth resolution stage.
//!
//! # Responsibilities
//! - Skip an explicit allow-list of public paths
//! - Require `Authorization: Bearer <token>` and the `session_key` cookie
//! - Resolve them to an [`Identity`] once per request through the users
//!   service, behind its breaker and retries
//! - Attach the identity to the [`RequestContext`] for handlers
//!
//! # Design Decisions
//! - Missing or malformed credentials are 401 without a backend call
//! - Resolution failures keep their own status (401 from the backend,
//!   503 for an open circuit, ...)

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::config::AuthConfig;
use crate::error::GatewayError;
use crate::http::request::{Identity, RequestContext, RequestId};
use crate::http::response::ApiError;
use crate::upstream::{Dispatcher, RpcRequest};

/// Turns credentials into an identity.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(
        &self,
        credential: &str,
        session_key: &str,
        ctx: &RequestContext,
    ) -> Result<Identity, GatewayError>;
}

/// Resolves credentials by calling an operation on a backend service.
#[derive(Debug, Clone)]
pub struct BackendAuthResolver {
    dispatcher: Dispatcher,
    service: String,
    operation: String,
}

impl BackendAuthResolver {
    pub fn new(dispatcher: Dispatcher, config: &AuthConfig) -> Self {
        Self {
            dispatcher,
            service: config.service.clone(),
            operation: config.operation.clone(),
        }
    }
}

#[async_trait]
impl AuthResolver for BackendAuthResolver {
    async fn resolve(
        &self,
        credential: &str,
        session_key: &str,
        ctx: &RequestContext,
    ) -> Result<Identity, GatewayError> {
        let request = RpcRequest::new(self.operation.clone(), ctx.request_id.clone())
            .with_payload(json!({ "token": credential, "session_key": session_key }))
            .with_session_key(Some(session_key.to_string()));

        let response = self.dispatcher.call(&self.service, ctx, request).await?;

        let subject_id = response
            .str_field("user_id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                GatewayError::Unauthenticated("credentials did not resolve to a user".to_string())
            })?;

        Ok(Identity {
            subject_id: subject_id.to_string(),
            role: response.str_field("role").unwrap_or_default().to_string(),
        })
    }
}

#[derive(Clone)]
pub struct AuthState {
    pub resolver: Arc<dyn AuthResolver>,
    pub public_routes: Arc<HashSet<String>>,
}

impl AuthState {
    pub fn new(resolver: Arc<dyn AuthResolver>, public_routes: &[String]) -> Self {
        Self {
            resolver,
            public_routes: Arc::new(public_routes.iter().cloned().collect()),
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_routes.contains(path)
    }
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| GatewayError::Unauthenticated("authorization header required".to_string()))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, token)| *scheme == "Bearer" && !token.is_empty() && !token.contains(' '))
        .map(|(_, token)| token)
        .ok_or_else(|| GatewayError::Unauthenticated("invalid authorization format".to_string()))
}

/// Pipeline stage 3: resolve the caller unless the path is public.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if state.is_public(req.uri().path()) {
        return next.run(req).await;
    }

    let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
        let error = GatewayError::Internal("request context missing".to_string());
        return ApiError::new(error, RequestId::from_headers(req.headers())).into_response();
    };
    let fail = |error: GatewayError| ApiError::new(error, Some(ctx.request_id.clone())).into_response();

    let token = match bearer_token(req.headers()) {
        Ok(token) => token.to_string(),
        Err(error) => return fail(error),
    };
    let Some(session_key) = ctx.session_key.as_deref() else {
        return fail(GatewayError::Unauthenticated("session_key cookie required".to_string()));
    };

    match state.resolver.resolve(&token, session_key, &ctx).await {
        Ok(identity) => {
            tracing::debug!(
                request_id = %ctx.request_id,
                subject_id = %identity.subject_id,
                role = %identity.role,
                "Caller resolved"
            );
            if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
                ctx.identity = Some(identity);
            }
            next.run(req).await
        }
        Err(error) => fail(error),
    }
}
