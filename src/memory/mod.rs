//! In-process document store.
//!
//! Implements the [`crate::interface`] traits over in-memory maps: ETags are
//! fresh UUIDs per write, every write advances a per-container sequence
//! number that orders the change feed, and query continuation tokens are
//! plain offsets. Useful for tests and local development without a service.

mod container;

pub use container::{MemoryContainer, OperationStats};

use crate::connection::ConnectionOptions;
use crate::core::{DocError, Result};
use crate::interface::{ClientFactory, DocumentClient, DocumentContainer, ExecutionMode};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct StoreInner {
    containers: Mutex<HashMap<(String, String), Arc<MemoryContainer>>>,
    connections_opened: AtomicUsize,
    connections_disposed: AtomicUsize,
    refuse_connections: AtomicBool,
    latency_micros: Arc<AtomicU64>,
}

impl StoreInner {
    fn container(&self, database: &str, name: &str) -> Result<Arc<MemoryContainer>> {
        let mut containers = self.containers.lock()?;
        Ok(containers
            .entry((database.to_string(), name.to_string()))
            .or_insert_with(|| {
                Arc::new(MemoryContainer::new(
                    database,
                    name,
                    Arc::clone(&self.latency_micros),
                ))
            })
            .clone())
    }
}

/// Shared in-memory account. Clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory that hands out connections to this store.
    pub fn factory(&self) -> MemoryClientFactory {
        MemoryClientFactory {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Container by address, created on first access.
    pub fn container(&self, database: &str, name: &str) -> Result<Arc<MemoryContainer>> {
        self.inner.container(database, name)
    }

    /// Adds simulated network latency to every container operation.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.inner.latency_micros.store(micros, Ordering::SeqCst);
    }

    /// Makes new connection attempts fail as if nothing were listening.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn connections_opened(&self) -> usize {
        self.inner.connections_opened.load(Ordering::SeqCst)
    }

    pub fn connections_disposed(&self) -> usize {
        self.inner.connections_disposed.load(Ordering::SeqCst)
    }
}

pub struct MemoryClientFactory {
    inner: Arc<StoreInner>,
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn connect(
        &self,
        options: &ConnectionOptions,
        mode: ExecutionMode,
    ) -> Result<Arc<dyn DocumentClient>> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(DocError::service_unavailable(
                format!("Failed to connect to {}", options.account_endpoint),
                io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            ));
        }
        self.inner.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryClient {
            inner: Arc::clone(&self.inner),
            mode,
            disposed: AtomicBool::new(false),
        }))
    }
}

pub struct MemoryClient {
    inner: Arc<StoreInner>,
    mode: ExecutionMode,
    disposed: AtomicBool,
}

#[async_trait]
impl DocumentClient for MemoryClient {
    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn container(&self, database: &str, container: &str) -> Result<Arc<dyn DocumentContainer>> {
        Ok(self.inner.container(database, container)?)
    }

    async fn dispose(&self) -> Result<()> {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.inner.connections_disposed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
