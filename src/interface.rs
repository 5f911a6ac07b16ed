//! Seams to the document-database service.
//!
//! The typed layer in this crate never speaks the wire protocol itself; it
//! drives these traits. [`crate::memory`] provides an in-process
//! implementation, production code wraps a real service SDK.

use crate::connection::ConnectionOptions;
use crate::core::Result;
use crate::query::Query;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Execution mode a connection handle is negotiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Low-latency point operations.
    Standard,
    /// High-throughput batched writes.
    Bulk,
}

/// A document as returned by the store, with its response metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub partition_key: String,
    pub body: Value,
    /// Version token (ETag) the store assigned on the last write.
    pub etag: String,
}

/// One page of a query executor request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: Query,
    /// `None` fans the query out across partitions.
    pub partition_key: Option<String>,
    pub continuation: Option<String>,
    pub max_item_count: usize,
    pub continuation_token_limit_kb: Option<u32>,
}

/// One page of a change feed read.
#[derive(Debug, Clone)]
pub struct ChangeFeedRequest {
    /// `None` starts from the earliest retained change.
    pub continuation: Option<String>,
    pub max_item_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<StoredDocument>,
    /// Token for the next page; `None` when the sequence is exhausted.
    pub continuation: Option<String>,
}

/// Per-container primitives exposed by the store.
#[async_trait]
pub trait DocumentContainer: Send + Sync {
    fn database(&self) -> &str;

    fn name(&self) -> &str;

    /// Fails with `NotFound` when the document is absent.
    async fn read_item(&self, id: &str, partition_key: &str) -> Result<StoredDocument>;

    /// Fails with `AlreadyExists` on an id collision within the partition.
    async fn create_item(
        &self,
        id: &str,
        partition_key: &str,
        body: Value,
    ) -> Result<StoredDocument>;

    /// With `if_match` set, fails with `VersionConflict` unless it equals the
    /// current version token.
    async fn replace_item(
        &self,
        id: &str,
        partition_key: &str,
        body: Value,
        if_match: Option<&str>,
    ) -> Result<StoredDocument>;

    async fn delete_item(&self, id: &str, partition_key: &str) -> Result<()>;

    async fn query_items(&self, request: QueryRequest) -> Result<Page>;

    /// Changed documents in modification order, latest version of each.
    async fn read_change_feed(&self, request: ChangeFeedRequest) -> Result<Page>;
}

/// A live connection to the service.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    fn container(&self, database: &str, container: &str) -> Result<Arc<dyn DocumentContainer>>;

    /// Releases network resources held by the handle.
    async fn dispose(&self) -> Result<()>;
}

/// Builds connection handles from options.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        options: &ConnectionOptions,
        mode: ExecutionMode,
    ) -> Result<Arc<dyn DocumentClient>>;
}
