//! Metric label derivation.
//!
//! Maps a method and request path to a bounded `(service, operation)` pair:
//!
//! ```text
//! GET    /                                    → (root,   root)
//! GET    /api                                 → (api,    api)
//! POST   /api/orders                          → (orders, post)
//! GET    /api/orders/123e4567-...-426614174000 → (orders, by_id)
//! DELETE /api/users/del/<36-char id>          → (users,  del_by_id)
//! GET    /api/users/a/b/c                     → (users,  a_b_etc)
//! GET    /metrics                             → (metrics, root)
//! GET    /api/<unregistered>/...              → (unknown, other)
//! GET    /<anything else>/...                 → (unknown, other)
//! ```
//!
//! Derivation is total: every input yields a label. Services come from the
//! registry, so cardinality stays bounded by the route table plus the
//! `by_id`/`etc`/`unknown` buckets.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::Method;

/// Segments this long or longer are treated as identifiers.
pub const ID_SEGMENT_LEN: usize = 32;

/// Operation segments kept before collapsing into `etc`.
pub const MAX_OPERATION_DEPTH: usize = 2;

/// First path segments outside `/api` that get their own service label.
const TOP_LEVEL: &[&str] = &["metrics"];

const UNKNOWN_SERVICE: &str = "unknown";
const UNKNOWN_OPERATION: &str = "other";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationLabels {
    pub service: String,
    pub operation: String,
}

impl OperationLabels {
    fn new(service: &str, operation: &str) -> Self {
        Self {
            service: service.to_string(),
            operation: operation.to_string(),
        }
    }

    fn unknown() -> Self {
        Self::new(UNKNOWN_SERVICE, UNKNOWN_OPERATION)
    }
}

/// The service names a path may be labelled with.
#[derive(Debug, Clone, Default)]
pub struct LabelPolicy {
    services: Arc<HashSet<String>>,
}

impl LabelPolicy {
    /// `services` are the names mounted under `/api`.
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: Arc::new(services.into_iter().map(Into::into).collect()),
        }
    }

    pub fn derive(&self, method: &Method, path: &str) -> OperationLabels {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["api", service, ..] if !self.services.contains(*service) => OperationLabels::unknown(),
            ["api", _, ..] | ["api"] | [] => derive_labels(method, path),
            [first, ..] if TOP_LEVEL.contains(first) => derive_labels(method, path),
            _ => OperationLabels::unknown(),
        }
    }
}

/// Labels taken from the path as is. Callers facing untrusted paths go
/// through [`LabelPolicy::derive`].
pub fn derive_labels(method: &Method, path: &str) -> OperationLabels {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let (service, rest) = match segments.as_slice() {
        [] => ("root", &[][..]),
        ["api"] => return OperationLabels::new("api", "api"),
        ["api", service, rest @ ..] => (*service, rest),
        [first, rest @ ..] => (*first, rest),
    };

    let operation = if rest.is_empty() {
        if method == Method::GET || method == Method::HEAD {
            "root".to_string()
        } else {
            method.as_str().to_lowercase()
        }
    } else {
        let mut parts: Vec<&str> = rest
            .iter()
            .take(MAX_OPERATION_DEPTH)
            .map(|s| if s.len() >= ID_SEGMENT_LEN { "by_id" } else { *s })
            .collect();
        if rest.len() > MAX_OPERATION_DEPTH {
            parts.push("etc");
        }
        parts.join("_")
    };

    OperationLabels {
        service: service.to_string(),
        operation,
    }
}
