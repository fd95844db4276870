//! Backend service registry.
//!
//! # Responsibilities
//! - Own one [`ServiceEntry`] per backend service: client, breaker, routes
//! - Built once at startup; read-only afterwards
//!
//! Tests build isolated registries with [`ServiceRegistry::register`] and
//! in-process clients.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{CircuitBreakerConfig, GatewayConfig, RouteConfig};
use crate::resilience::CircuitBreaker;
use crate::upstream::client::{BackendClient, HttpBackend};

/// Everything the gateway holds for one backend service.
pub struct ServiceEntry {
    pub name: String,
    pub breaker: CircuitBreaker,
    pub client: Arc<dyn BackendClient>,
    pub routes: Vec<RouteConfig>,
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name)
            .field("breaker", &self.breaker.state())
            .field("routes", &self.routes.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`HttpBackend`] and breaker per configured service.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut registry = Self::new();
        for service in &config.services {
            let client = Arc::new(HttpBackend::new(
                service.name.clone(),
                &service.address,
                &config.timeouts,
            ));
            registry.register(
                service.name.clone(),
                client,
                &config.circuit_breaker,
                service.routes.clone(),
            );
            tracing::info!(
                service = %service.name,
                address = %service.address,
                routes = service.routes.len(),
                "Backend service registered"
            );
        }
        registry
    }

    /// Add a service, replacing any previous entry of the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        client: Arc<dyn BackendClient>,
        breaker: &CircuitBreakerConfig,
        routes: Vec<RouteConfig>,
    ) -> &mut Self {
        let name = name.into();
        let entry = ServiceEntry {
            breaker: CircuitBreaker::new(name.clone(), breaker),
            name: name.clone(),
            client,
            routes,
        };
        self.services.insert(name, Arc::new(entry));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.services.get(name).cloned()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<ServiceEntry>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
