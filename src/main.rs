//! API gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                   API GATEWAY                    │
//!                     │                                                  │
//!   Client Request    │  ┌──────────┐  ┌────────────┐  ┌─────────────┐   │
//!   ──────────────────┼─▶│rate_limit│─▶│ request_id │─▶│    auth     │   │
//!                     │  └──────────┘  └────────────┘  └──────┬──────┘   │
//!                     │                                       ▼          │
//!                     │                ┌────────────┐  ┌─────────────┐   │
//!                     │                │  metrics   │◀─│   handler   │   │
//!                     │                └────────────┘  └──────┬──────┘   │
//!                     │                                       ▼          │
//!   Client Response   │  ┌──────────┐  ┌────────────┐  ┌─────────────┐   │
//!   ◀─────────────────┼──│ response │◀─│  breaker   │◀─│   retries   │◀──┼── Backend
//!                     │  └──────────┘  └────────────┘  └─────────────┘   │   Service
//!                     └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, GatewayConfig, RateLimitStoreKind};
use api_gateway::http::{GatewayParts, GatewayServer};
use api_gateway::lifecycle::{
    shutdown_signal, Resource, ServerDrain, ShutdownCoordinator, StoreResource,
};
use api_gateway::observability::{init_logging, init_metrics};
use api_gateway::resilience::RetryExecutor;
use api_gateway::security::{
    AuthResolver, BackendAuthResolver, CounterStore, MemoryCounterStore, RateLimiter,
    RedisCounterStore,
};
use api_gateway::upstream::{Dispatcher, ServiceRegistry};

#[derive(Parser, Debug)]
#[command(name = "api-gateway", version, about = "HTTP to RPC API gateway")]
struct Cli {
    /// Path to a TOML config file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides `observability.log_level`.
    #[arg(short, long)]
    level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path),
        None => Ok(GatewayConfig::default()),
    };
    let level = cli.level.clone().unwrap_or_else(|| match &config {
        Ok(config) => config.observability.log_level.clone(),
        Err(_) => "info".to_string(),
    });
    init_logging(&level);

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load configuration");
            return Err(err.into());
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "api-gateway starting"
    );

    let metrics = if config.observability.metrics_enabled {
        match init_metrics() {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!(error = %err, "Failed to install metrics recorder");
                None
            }
        }
    } else {
        None
    };

    let registry = Arc::new(ServiceRegistry::from_config(&config));
    let dispatcher = Dispatcher::new(registry.clone(), RetryExecutor::from_config(&config.retries));
    let mut coordinator = ShutdownCoordinator::default();

    let rate_limiter = if config.rate_limit.enabled {
        let store = counter_store(&config).await;
        coordinator.register(Arc::new(StoreResource(store.clone())));
        Some(Arc::new(RateLimiter::new(store, &config.rate_limit)))
    } else {
        None
    };

    let auth: Option<Arc<dyn AuthResolver>> = if config.auth.enabled {
        Some(Arc::new(BackendAuthResolver::new(dispatcher.clone(), &config.auth)))
    } else {
        None
    };

    let server = GatewayServer::new(
        &config,
        GatewayParts {
            dispatcher,
            rate_limiter,
            auth,
            metrics,
        },
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let handle = tokio::spawn(server.run(listener, coordinator.signal().subscribe()));
    coordinator.register(Arc::new(ServerDrain::new("http_server", handle)));
    for entry in registry.entries() {
        coordinator.register(entry.clone() as Arc<dyn Resource>);
    }

    shutdown_signal().await;

    let timeout = Duration::from_secs(config.shutdown.timeout_secs);
    if let Err(err) = coordinator.shutdown(timeout).await {
        tracing::error!(error = %err, "Shutdown finished with errors");
    }
    Ok(())
}

/// The configured counter store; an unreachable Redis falls back to memory.
async fn counter_store(config: &GatewayConfig) -> Arc<dyn CounterStore> {
    let rl = &config.rate_limit;
    match rl.store {
        RateLimitStoreKind::Memory => Arc::new(MemoryCounterStore::new()),
        RateLimitStoreKind::Redis => {
            let timeout = Duration::from_secs(config.timeouts.connect_secs);
            match RedisCounterStore::connect(&rl.redis_url, timeout).await {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    tracing::warn!(
                        url = %rl.redis_url,
                        error = %err,
                        "Rate limit store unreachable, using in-memory counters"
                    );
                    Arc::new(MemoryCounterStore::new())
                }
            }
        }
    }
}
