//! Linear backoff between retry attempts.

use std::time::Duration;

/// Delay to wait after the `attempt`-th failure (1-based).
///
/// `attempt * base`, saturating. Attempt 0 waits nothing.
pub fn calculate_backoff(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}
