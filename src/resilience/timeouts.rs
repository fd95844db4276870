//! Request deadlines.
//!
//! # Responsibilities
//! - Fix an absolute deadline when a request enters the gateway
//! - Bound every outbound attempt and backoff wait by that deadline
//! - Cancel in-flight work cleanly (the future is dropped) on expiry
//!
//! Uses `tokio::time::Instant` so paused-clock tests drive it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Absolute point in time after which no new work may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

/// Returned when the deadline passed before the future finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Whether a wait of `delay` starting now would end past the deadline.
    pub fn would_expire_after(&self, delay: Duration) -> bool {
        Instant::now() + delay >= self.0
    }

    /// Run `fut` until it completes or the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout_at(self.0, fut).await.map_err(|_| Elapsed)
    }
}
