use crate::core::{ErrorKind, Resource, Result};
use crate::registry::Container;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Level, event};

/// Checkpoint document for one listener instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// The lease token
    pub id: String,
    /// Processor name; every instance of a processor shares a partition
    pub partition_key: String,
    pub owner: String,
    /// Feed position after the last fully dispatched batch
    pub continuation: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    etag: Option<String>,
}

impl Resource for Lease {
    fn document_id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.partition_key
    }

    fn version_token(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_version_token(&mut self, token: Option<String>) {
        self.etag = token;
    }
}

/// Reads and advances one listener's lease in the lease container.
pub(crate) struct LeaseStore {
    container: Container,
    token: String,
    processor: String,
    owner: String,
}

impl LeaseStore {
    pub fn new(container: Container, token: String, processor: &str, owner: &str) -> Self {
        Self {
            container,
            token,
            processor: processor.to_string(),
            owner: owner.to_string(),
        }
    }

    /// Loads the lease, creating an empty one on first start.
    pub async fn acquire(&self) -> Result<Lease> {
        if let Some(lease) = self.load().await? {
            event!(
                Level::DEBUG,
                lease = %self.token,
                continuation = ?lease.continuation,
                "resuming from lease"
            );
            return Ok(lease);
        }

        let lease = Lease {
            id: self.token.clone(),
            partition_key: self.processor.clone(),
            owner: self.owner.clone(),
            continuation: None,
            updated_at: Utc::now(),
            etag: None,
        };
        match self.write(&lease, None).await {
            Ok(created) => Ok(created),
            // Another start of the same instance got there first.
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                self.container
                    .read_item(&self.token, &self.processor)
                    .await
                    .and_then(|doc| self.container.options().serializer.from_document(doc))
            }
            Err(err) => Err(err),
        }
    }

    /// Records `continuation` as the resume point.
    ///
    /// The lease is owned by this instance, so a version conflict only means
    /// our copy is stale; it is re-read and written once more.
    pub async fn checkpoint(&self, lease: &Lease, continuation: Option<String>) -> Result<Lease> {
        let mut next = lease.clone();
        next.continuation = continuation;
        next.owner = self.owner.clone();
        next.updated_at = Utc::now();

        match self.write(&next, lease.version_token()).await {
            Ok(written) => Ok(written),
            Err(err) if err.is_version_conflict() || err.is_not_found() => {
                let fresh = self.load().await?;
                let etag = fresh.as_ref().and_then(|l| l.version_token().map(str::to_string));
                self.write(&next, etag.as_deref()).await
            }
            Err(err) => Err(err),
        }
    }

    async fn load(&self) -> Result<Option<Lease>> {
        match self.container.read_item(&self.token, &self.processor).await {
            Ok(doc) => Ok(Some(self.container.options().serializer.from_document(doc)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Replaces when `if_match` is present, creates otherwise.
    async fn write(&self, lease: &Lease, if_match: Option<&str>) -> Result<Lease> {
        let serializer = &self.container.options().serializer;
        let body = serializer.to_document(lease)?;
        let stored = match if_match {
            Some(etag) => {
                self.container
                    .replace_item(&lease.id, &lease.partition_key, body, Some(etag))
                    .await?
            }
            None => {
                self.container
                    .create_item(&lease.id, &lease.partition_key, body)
                    .await?
            }
        };
        serializer.from_document(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionCache, ConnectionOptions};
    use crate::interface::ExecutionMode;
    use crate::memory::MemoryStore;
    use crate::registry::{ContainerLocator, ResourceRegistry};
    use std::sync::Arc;

    async fn lease_store(store: &MemoryStore) -> LeaseStore {
        let locator = ContainerLocator::new(
            Arc::new(ResourceRegistry::new(ConnectionOptions::emulator("key"))),
            Arc::new(ConnectionCache::new(Arc::new(store.factory()))),
        );
        let container = locator
            .locate_by_name("leases", None, ExecutionMode::Standard)
            .await
            .unwrap();
        LeaseStore::new(container, "orders.a".into(), "orders", "a")
    }

    #[tokio::test]
    async fn test_acquire_creates_then_resumes() {
        let store = MemoryStore::new();
        let leases = lease_store(&store).await;

        let lease = leases.acquire().await.unwrap();
        assert_eq!(lease.id, "orders.a");
        assert!(lease.continuation.is_none());

        leases.checkpoint(&lease, Some("7".into())).await.unwrap();

        let resumed = lease_store(&store).await.acquire().await.unwrap();
        assert_eq!(resumed.continuation.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_checkpoint_survives_stale_copy() {
        let store = MemoryStore::new();
        let leases = lease_store(&store).await;

        let lease = leases.acquire().await.unwrap();
        leases.checkpoint(&lease, Some("1".into())).await.unwrap();
        // `lease` still carries the first etag
        let written = leases.checkpoint(&lease, Some("2".into())).await.unwrap();
        assert_eq!(written.continuation.as_deref(), Some("2"));
    }
}
