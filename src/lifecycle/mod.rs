//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → return to main
//!
//! Shutdown (shutdown.rs):
//!     broadcast → listener stops accepting and drains in-flight requests
//!              → then backends, counter store closed in parallel
//!              → both phases under one deadline
//! ```
//!
//! # Design Decisions
//! - Resources register themselves with the coordinator as they are built
//! - Shutdown has a timeout: stragglers are reported and abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::{
    ClosePhase, CloseError, Resource, ServerDrain, Shutdown, ShutdownCoordinator, ShutdownError,
    StoreResource,
};
pub use signals::shutdown_signal;
