//! Shutdown coordination for the gateway.
//!
//! ```text
//! shutdown(timeout)
//!     → broadcast: listener stops accepting, starts draining
//!     → drain phase: wait for in-flight work (servers)
//!     → release phase: close backends and stores concurrently
//!     → both phases share one deadline
//! ```
//!
//! In-flight requests keep their backend clients until the drain phase is
//! over. A close that misses the deadline is abandoned; closes that already
//! finished stay finished.

use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::security::CounterStore;
use crate::upstream::ServiceEntry;

pub type CloseError = Box<dyn StdError + Send + Sync>;

/// Broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// When a resource is closed relative to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePhase {
    /// Finishes in-flight work; closed first.
    Drain,
    /// Used by in-flight work; closed once every drain has finished.
    Release,
}

/// Something that must be released before the process exits.
#[async_trait]
pub trait Resource: Send + Sync {
    fn name(&self) -> String;

    fn phase(&self) -> ClosePhase {
        ClosePhase::Release
    }

    async fn close(&self) -> Result<(), CloseError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("shutdown deadline exceeded, still closing: {}", pending.join(", "))]
    DeadlineExceeded { pending: Vec<String> },

    #[error("failed to close: {}", failed.join(", "))]
    CloseFailed { failed: Vec<String> },
}

pub struct ShutdownCoordinator {
    signal: Shutdown,
    resources: Vec<Arc<dyn Resource>>,
}

impl ShutdownCoordinator {
    pub fn new(signal: Shutdown) -> Self {
        Self {
            signal,
            resources: Vec::new(),
        }
    }

    pub fn signal(&self) -> &Shutdown {
        &self.signal
    }

    pub fn register(&mut self, resource: Arc<dyn Resource>) -> &mut Self {
        self.resources.push(resource);
        self
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.name()).collect()
    }

    /// Stop intake, drain servers, then release everything else, all
    /// within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let deadline = Instant::now() + timeout;
        tracing::info!(
            resources = self.resources.len(),
            timeout = ?timeout,
            "Shutting down"
        );
        self.signal.trigger();

        let (drains, releases): (Vec<_>, Vec<_>) = self
            .resources
            .iter()
            .cloned()
            .partition(|r| r.phase() == ClosePhase::Drain);

        let mut failed = match close_all(&drains, deadline).await {
            Ok(failed) => failed,
            Err(mut pending) => {
                pending.extend(releases.iter().map(|r| r.name()));
                pending.sort();
                tracing::error!(pending = ?pending, "Shutdown deadline exceeded while draining");
                return Err(ShutdownError::DeadlineExceeded { pending });
            }
        };
        tracing::debug!("Drain phase complete, releasing resources");

        match close_all(&releases, deadline).await {
            Ok(more) => failed.extend(more),
            Err(pending) => {
                tracing::error!(pending = ?pending, "Shutdown deadline exceeded");
                return Err(ShutdownError::DeadlineExceeded { pending });
            }
        }

        if failed.is_empty() {
            tracing::info!("Shutdown complete");
            Ok(())
        } else {
            failed.sort();
            Err(ShutdownError::CloseFailed { failed })
        }
    }
}

/// Close `resources` concurrently until `deadline`. Returns the names that
/// failed, or the sorted names still pending when the deadline hit.
async fn close_all(
    resources: &[Arc<dyn Resource>],
    deadline: Instant,
) -> Result<Vec<String>, Vec<String>> {
    let mut pending: BTreeSet<String> = BTreeSet::new();
    let mut closes = FuturesUnordered::new();
    for resource in resources {
        let name = resource.name();
        pending.insert(name.clone());
        let resource = resource.clone();
        closes.push(async move {
            let result = resource.close().await;
            (name, result)
        });
    }

    let mut failed = Vec::new();
    loop {
        match tokio::time::timeout_at(deadline, closes.next()).await {
            Ok(Some((name, Ok(())))) => {
                tracing::info!(resource = %name, "Resource closed");
                pending.remove(&name);
            }
            Ok(Some((name, Err(err)))) => {
                tracing::error!(resource = %name, error = %err, "Resource failed to close");
                pending.remove(&name);
                failed.push(name);
            }
            Ok(None) => return Ok(failed),
            Err(_) => return Err(pending.into_iter().collect()),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Shutdown::new())
    }
}

#[async_trait]
impl Resource for ServiceEntry {
    fn name(&self) -> String {
        format!("backend:{}", self.name)
    }

    async fn close(&self) -> Result<(), CloseError> {
        self.client.close().await.map_err(Into::into)
    }
}

/// The rate-limit counter store.
pub struct StoreResource(pub Arc<dyn CounterStore>);

#[async_trait]
impl Resource for StoreResource {
    fn name(&self) -> String {
        "rate_limit_store".to_string()
    }

    async fn close(&self) -> Result<(), CloseError> {
        self.0.close().await.map_err(Into::into)
    }
}

/// A spawned server task; closing waits for it to finish draining.
pub struct ServerDrain {
    name: String,
    handle: Mutex<Option<JoinHandle<Result<(), std::io::Error>>>>,
}

impl ServerDrain {
    pub fn new(name: impl Into<String>, handle: JoinHandle<Result<(), std::io::Error>>) -> Self {
        Self {
            name: name.into(),
            handle: Mutex::new(Some(handle)),
        }
    }
}

#[async_trait]
impl Resource for ServerDrain {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn phase(&self) -> ClosePhase {
        ClosePhase::Drain
    }

    async fn close(&self) -> Result<(), CloseError> {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => Ok(handle.await??),
            None => Ok(()),
        }
    }
}
