//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-IP fixed window, before anything else)
//!     → [request id assigned]
//!     → auth.rs (bearer + session cookie → Identity, public routes skip)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - The rate limiter fails open: a broken store never blocks traffic
//! - Auth fails closed: no identity, no backend call
//! - No trust in client input

pub mod auth;
pub mod rate_limit;
pub mod store;

pub use auth::{auth_middleware, AuthResolver, AuthState, BackendAuthResolver};
pub use rate_limit::{rate_limit_middleware, RateLimiter};
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreError};
