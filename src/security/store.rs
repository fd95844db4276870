//! Counter stores for fixed-window rate limiting.
//!
//! # Responsibilities
//! - Atomically increment a per-key counter
//! - Give a counter an expiry exactly once, on the increment that creates it
//! - Never leave a counter without an expiry: a failed expiry is repaired
//!   on the next increment
//!
//! # Implementations
//! - [`MemoryCounterStore`]: process-local (`DashMap`), single instance or tests
//! - [`RedisCounterStore`]: shared by every gateway instance; `INCR` and
//!   `PEXPIRE` run in one Lua script, so the window is set atomically

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use thiserror::Error;
use tokio::time::Instant;

/// Entries kept before expired memory counters are first swept. Later sweeps
/// wait until the map has doubled since the previous one.
const SWEEP_THRESHOLD: usize = 10_000;

const INCR_WITH_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("store closed")]
    Closed,
}

/// Atomic counters with expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, creating it at 1. Returns the new value.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Give `key` an expiry of `ttl` unless it already has one.
    async fn expire_if_unset(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Increment `key`; a counter created by this call expires after `window`.
    ///
    /// The default issues two operations. The expiry is re-asserted on every
    /// increment (retried once), so a counter whose expiry could not be set
    /// picks one up on its next increment instead of living forever.
    /// Stores that can do both atomically override it.
    async fn increment_in_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let count = self.increment(key).await?;
        if let Err(first) = self.expire_if_unset(key, window).await {
            tracing::debug!(key = %key, error = %first, "Setting window expiry failed, retrying");
            if let Err(err) = self.expire_if_unset(key, window).await {
                tracing::error!(
                    key = %key,
                    count,
                    error = %err,
                    "Rate limit counter has no expiry, repairing on next increment"
                );
            }
        }
        Ok(count)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local counter store.
#[derive(Debug)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
    /// Map size that triggers the next sweep.
    sweep_at: AtomicUsize,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self {
            counters: DashMap::new(),
            sweep_at: AtomicUsize::new(SWEEP_THRESHOLD),
        }
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop every expired counter.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.counters.retain(|_, c| !c.is_expired(now));
        let next = self.counters.len().saturating_mul(2).max(SWEEP_THRESHOLD);
        self.sweep_at.store(next, Ordering::Relaxed);
    }

    /// Sweep once the map outgrows `sweep_at`. One caller claims the sweep;
    /// the rest carry on.
    fn maybe_sweep(&self) {
        let at = self.sweep_at.load(Ordering::Relaxed);
        if self.counters.len() <= at {
            return;
        }
        if self
            .sweep_at
            .compare_exchange(at, usize::MAX, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let before = self.counters.len();
            self.sweep();
            tracing::debug!(before, after = self.counters.len(), "Swept expired rate limit counters");
        }
    }

    fn bump(&self, key: &str, window: Option<Duration>) -> u64 {
        self.maybe_sweep();

        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }
        entry.count += 1;
        if entry.count == 1 {
            if let Some(window) = window {
                entry.expires_at = Some(now + window);
            }
        }
        entry.count
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.bump(key, None))
    }

    async fn expire_if_unset(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(mut counter) = self.counters.get_mut(key) {
            if counter.expires_at.is_none() {
                counter.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn increment_in_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        Ok(self.bump(key, Some(window)))
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.counters.clear();
        Ok(())
    }
}

/// Redis-backed counter store shared across gateway instances.
pub struct RedisCounterStore {
    conn: Mutex<Option<ConnectionManager>>,
    script: Script,
}

impl RedisCounterStore {
    /// Connect to `url`, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::ConnectTimeout(connect_timeout))??;

        tracing::info!(url = %url, "Connected to rate limit store");
        Ok(Self {
            conn: Mutex::new(Some(manager)),
            script: Script::new(INCR_WITH_WINDOW),
        })
    }

    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::Closed)
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let count: u64 = conn.incr(key, 1u64).await?;
        Ok(count)
    }

    async fn expire_if_unset(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn increment_in_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let count: u64 = self
            .script
            .key(key)
            .arg(millis)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner).take();
        tracing::info!("Rate limit store connection released");
        Ok(())
    }
}
