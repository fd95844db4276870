//! Structured logging.
//!
//! # Design Decisions
//! - `tracing` events with structured fields (`request_id`, `service`, ...)
//! - `RUST_LOG` wins when set; otherwise the configured level applies to
//!   this crate and `tower_http`, `warn` to everything else

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("warn,api_gateway={level},tower_http={level}"))
}
