// ============================================================================
// docbind Library
// ============================================================================

pub mod change_feed;
pub mod connection;
pub mod core;
pub mod interface;
pub mod memory;
pub mod query;
pub mod registry;
pub mod repository;

// Re-export main types for convenience
pub use core::{DocError, ErrorKind, Resource, ResourceTypeKey, Result, SerializerOptions};
pub use interface::{ClientFactory, DocumentClient, DocumentContainer, ExecutionMode};
pub use query::{Filter, Query, SortOrder};

pub use change_feed::{ChangeFeedOptions, ChangeFeedProcessor, ChangeHandler, FeedErrorHandler};
pub use connection::{ConnectionCache, ConnectionOptions, Credential};
pub use registry::{Container, ContainerBinding, ContainerLocator, ResourceRegistry};
pub use repository::{ConflictRetryPolicy, Reader, Writer};

use std::sync::Arc;

// ============================================================================
// High-level Client API
// ============================================================================

/// Entry point bundling the registry, the connection cache and the locator.
///
/// One `DocClient` per process is the usual setup: register resource types
/// at startup, hand out readers and writers, call [`DocClient::shutdown`] on
/// exit.
///
/// # Examples
///
/// ```
/// use docbind::memory::MemoryStore;
/// use docbind::{ConnectionOptions, DocClient, Resource};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Order {
///     id: String,
///     customer: String,
///     #[serde(skip)]
///     etag: Option<String>,
/// }
///
/// impl Resource for Order {
///     fn document_id(&self) -> &str { &self.id }
///     fn partition_key(&self) -> &str { &self.customer }
///     fn version_token(&self) -> Option<&str> { self.etag.as_deref() }
///     fn set_version_token(&mut self, token: Option<String>) { self.etag = token; }
/// }
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// let client = DocClient::with_memory_store(&store, ConnectionOptions::emulator("key"));
/// client.register::<Order>("orders").unwrap();
///
/// let order = Order { id: "1".into(), customer: "acme".into(), etag: None };
/// client.writer::<Order>().create(&order).await.unwrap();
/// assert!(client.reader::<Order>().exists("1", "acme").await.unwrap());
/// client.shutdown().await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct DocClient {
    locator: ContainerLocator,
}

impl DocClient {
    /// Client whose connections are opened by `factory`.
    pub fn new(default_options: ConnectionOptions, factory: Arc<dyn ClientFactory>) -> Self {
        let registry = Arc::new(ResourceRegistry::new(default_options));
        let cache = Arc::new(ConnectionCache::new(factory));
        Self {
            locator: ContainerLocator::new(registry, cache),
        }
    }

    /// Client backed by an in-process store.
    pub fn with_memory_store(store: &memory::MemoryStore, default_options: ConnectionOptions) -> Self {
        Self::new(default_options, Arc::new(store.factory()))
    }

    /// Binds `T` to a container in the default database.
    pub fn register<T: Resource>(&self, container_name: &str) -> Result<Arc<ContainerBinding>> {
        self.registry().register::<T>(container_name, None, None)
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        self.locator.registry()
    }

    pub fn locator(&self) -> &ContainerLocator {
        &self.locator
    }

    pub fn reader<T: Resource>(&self) -> Reader<T> {
        Reader::new(self.locator.clone())
    }

    pub fn writer<T: Resource>(&self) -> Writer<T> {
        Writer::new(self.locator.clone())
    }

    /// Writer routed through the bulk connection handle.
    pub fn bulk_writer<T: Resource>(&self) -> Writer<T> {
        self.writer::<T>().bulk()
    }

    /// Builds a change feed listener for `T`; call `start` to run it.
    pub fn change_feed<T: Resource>(
        &self,
        handler: impl ChangeHandler<T>,
        options: ChangeFeedOptions,
    ) -> ChangeFeedProcessor<T> {
        ChangeFeedProcessor::new(self.locator.clone(), handler, options)
    }

    /// Disposes every connection handle.
    pub async fn shutdown(&self) -> Result<()> {
        self.locator.shutdown().await
    }
}
