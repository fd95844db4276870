//! API gateway library.
//!
//! The gateway terminates client HTTP traffic, runs every request through a
//! fixed pipeline (rate limit, correlation id, auth, metrics) and forwards it
//! as an RPC to the owning backend service behind a per-service circuit
//! breaker and retry loop.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::GatewayServer;
pub use lifecycle::{Shutdown, ShutdownCoordinator};
