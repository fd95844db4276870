//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → read once at startup to build the registry, limiter and server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthConfig, CircuitBreakerConfig, CorsConfig, GatewayConfig, ListenerConfig,
    ObservabilityConfig, RateLimitConfig, RateLimitStoreKind, RetryConfig, RouteConfig,
    SecurityConfig, ServerConfig, ServiceConfig, ShutdownConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
