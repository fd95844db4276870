//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call to a backend service:
//!     → circuit_breaker.rs (admit, or fail fast while open)
//!     → retries.rs (attempt, classify failure, linear backoff)
//!     → timeouts.rs (every attempt and wait bounded by the request deadline)
//!     → result reported back to the breaker as one success or failure
//! ```
//!
//! # Design Decisions
//! - Retries run inside the breaker: an exhausted retry loop is one failure
//! - The breaker counts every error; only the retry loop looks at error kinds
//! - Deadlines are absolute and fixed at ingress; nothing starts past them

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState, Counts};
pub use retries::{RetryError, RetryExecutor};
pub use timeouts::Deadline;
