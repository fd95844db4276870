//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: a bounded number of probes test whether the backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after open_timeout
//! Half-Open → Closed: half_open_max_requests consecutive probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - One breaker per backend service, process-local
//! - Any error from the wrapped call counts as a failure; retry
//!   classification happens inside the call
//! - State, counters and probe admission live behind one mutex that is
//!   never held across an await
//! - Every state change starts a new generation; results from calls
//!   admitted in an older generation are ignored

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 = closed, 1 = half-open, 2 = open.
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Request counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was rejected without being attempted.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The wrapped operation failed.
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
    /// When the closed-state counters are next reset.
    rolling_reset_at: Option<Instant>,
}

/// Per-service circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_timeout: Duration,
    half_open_max_requests: u32,
    rolling_interval: Duration,
    inner: Mutex<Inner>,
    events: watch::Sender<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        let name = name.into();
        let rolling_interval = Duration::from_millis(config.rolling_interval_ms);
        let (events, _) = watch::channel(CircuitState::Closed);

        metrics::record_breaker_state(&name, CircuitState::Closed);

        Self {
            name,
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: Duration::from_millis(config.open_timeout_ms),
            half_open_max_requests: config.half_open_max_requests.max(1),
            rolling_interval,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                probes_in_flight: 0,
                opened_at: None,
                rolling_reset_at: rolling_deadline(Instant::now(), rolling_interval),
            }),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying any time-based transition first.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.counts
    }

    pub fn probes_in_flight(&self) -> u32 {
        self.lock().probes_in_flight
    }

    /// Time until an open breaker starts probing. Zero unless open.
    pub fn retry_after(&self) -> Duration {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                self.open_timeout.saturating_sub(now.saturating_duration_since(opened))
            }
            _ => Duration::ZERO,
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.events.subscribe()
    }

    /// Run `op` if the breaker admits it, and record the outcome.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.admit() {
            Some(permit) => permit,
            None => {
                metrics::record_breaker_rejection(&self.name);
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
        };

        let result = op().await;
        permit.complete(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    fn admit(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());

        let probe = match inner.state {
            CircuitState::Open => return None,
            CircuitState::HalfOpen => {
                if inner.probes_in_flight >= self.half_open_max_requests {
                    return None;
                }
                inner.probes_in_flight += 1;
                true
            }
            CircuitState::Closed => false,
        };

        inner.counts.on_request();
        Some(CallPermit {
            breaker: self,
            generation: inner.generation,
            probe,
            done: false,
        })
    }

    fn on_result(&self, generation: u64, probe: bool, success: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);

        if inner.generation != generation {
            return;
        }
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.counts.on_success(),
            (CircuitState::Closed, false) => {
                inner.counts.on_failure();
                if inner.counts.consecutive_failures >= self.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.half_open_max_requests {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            (CircuitState::HalfOpen, false) => {
                inner.counts.on_failure();
                self.transition(&mut inner, CircuitState::Open, now);
            }
            // Calls are never admitted while open within one generation.
            (CircuitState::Open, _) => {}
        }
    }

    /// A permit dropped without a result: free the probe slot, count nothing.
    fn release(&self, generation: u64, probe: bool) {
        let mut inner = self.lock();
        if probe && inner.generation == generation {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            CircuitState::Closed => {
                if inner.rolling_reset_at.is_some_and(|at| at <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened))
                    .unwrap_or(self.open_timeout);
                if elapsed >= self.open_timeout {
                    self.transition(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        let counts = inner.counts;
        inner.state = to;
        self.new_generation(inner, now);

        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.name,
                from = %from,
                to = %to,
                consecutive_failures = counts.consecutive_failures,
                "Circuit breaker state changed"
            ),
            _ => tracing::info!(
                service = %self.name,
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }
        metrics::record_breaker_state(&self.name, to);
        self.events.send_replace(to);
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.probes_in_flight = 0;
        match inner.state {
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.rolling_reset_at = rolling_deadline(now, self.rolling_interval);
            }
            CircuitState::Open => {
                inner.opened_at = Some(now);
                inner.rolling_reset_at = None;
            }
            CircuitState::HalfOpen => {
                inner.rolling_reset_at = None;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn rolling_deadline(now: Instant, interval: Duration) -> Option<Instant> {
    if interval.is_zero() {
        None
    } else {
        Some(now + interval)
    }
}

/// Admission ticket for one call.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    done: bool,
}

impl CallPermit<'_> {
    fn complete(mut self, success: bool) {
        self.done = true;
        self.breaker.on_result(self.generation, self.probe, success);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.breaker.release(self.generation, self.probe);
        }
    }
}
