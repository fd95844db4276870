//! Bounded retries for backend calls.
//!
//! # Responsibilities
//! - Classify each failure as retryable or terminal (by [`RpcCode`])
//! - Re-run retryable failures with linear backoff, up to `max_retries` attempts
//! - Never start an attempt or a backoff wait past the request deadline
//!
//! The executor holds nothing but its configuration, so one instance is
//! shared by every request. It runs inside the circuit breaker: an
//! exhausted retry loop reaches the breaker as a single failure.
//!
//! [`RpcCode`]: crate::upstream::rpc::RpcCode

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::Deadline;
use crate::upstream::rpc::RpcError;

/// Why a retried call finally failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// The backend returned a non-retryable error.
    #[error("terminal backend error: {0}")]
    Terminal(RpcError),

    /// Every attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: RpcError },

    /// The request deadline passed; no further attempt was started.
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },
}

/// Stateless retry loop.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryExecutor {
    /// `max_retries` is the total number of attempts; zero is treated as one.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub async fn run<T, F, Fut>(&self, deadline: Deadline, op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        self.run_with(deadline, op, |_, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_retry(attempt, error)` before
    /// each backoff wait.
    pub async fn run_with<T, F, Fut, R>(
        &self,
        deadline: Deadline,
        mut op: F,
        mut on_retry: R,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
        R: FnMut(u32, &RpcError),
    {
        let mut attempt = 0;
        loop {
            if deadline.is_expired() {
                return Err(RetryError::DeadlineExceeded { attempts: attempt });
            }
            attempt += 1;

            let outcome = match deadline.run(op()).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(RetryError::DeadlineExceeded { attempts: attempt }),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(RetryError::Terminal(err));
            }
            if attempt >= self.max_retries {
                return Err(RetryError::Exhausted { attempts: attempt, last: err });
            }

            let delay = calculate_backoff(attempt, self.base_delay);
            if deadline.would_expire_after(delay) {
                return Err(RetryError::DeadlineExceeded { attempts: attempt });
            }

            tracing::debug!(
                attempt,
                max_retries = self.max_retries,
                code = %err.code,
                delay = ?delay,
                "Retrying backend call"
            );
            on_retry(attempt, &err);
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
