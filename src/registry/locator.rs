use super::ResourceRegistry;
use crate::connection::diagnostics::diagnose;
use crate::connection::{ConnectionCache, ConnectionOptions};
use crate::core::{Resource, ResourceTypeKey, Result};
use crate::interface::{
    ChangeFeedRequest, DocumentContainer, ExecutionMode, Page, QueryRequest, StoredDocument,
};
use serde_json::Value;
use std::sync::Arc;

/// A located container plus the options it was reached through.
///
/// Cheap to clone and to re-derive; not cached beyond the connection handle.
#[derive(Clone)]
pub struct Container {
    raw: Arc<dyn DocumentContainer>,
    options: Arc<ConnectionOptions>,
    mode: ExecutionMode,
}

impl Container {
    pub fn database(&self) -> &str {
        self.raw.database()
    }

    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub async fn read_item(&self, id: &str, partition_key: &str) -> Result<StoredDocument> {
        self.raw
            .read_item(id, partition_key)
            .await
            .map_err(|err| diagnose(&self.options, err))
    }

    pub async fn create_item(
        &self,
        id: &str,
        partition_key: &str,
        body: Value,
    ) -> Result<StoredDocument> {
        self.raw
            .create_item(id, partition_key, body)
            .await
            .map_err(|err| diagnose(&self.options, err))
    }

    pub async fn replace_item(
        &self,
        id: &str,
        partition_key: &str,
        body: Value,
        if_match: Option<&str>,
    ) -> Result<StoredDocument> {
        self.raw
            .replace_item(id, partition_key, body, if_match)
            .await
            .map_err(|err| diagnose(&self.options, err))
    }

    pub async fn delete_item(&self, id: &str, partition_key: &str) -> Result<()> {
        self.raw
            .delete_item(id, partition_key)
            .await
            .map_err(|err| diagnose(&self.options, err))
    }

    pub async fn query_items(&self, mut request: QueryRequest) -> Result<Page> {
        if request.continuation_token_limit_kb.is_none() {
            request.continuation_token_limit_kb = self.options.continuation_token_limit_kb;
        }
        self.raw
            .query_items(request)
            .await
            .map_err(|err| diagnose(&self.options, err))
    }

    pub async fn read_change_feed(&self, request: ChangeFeedRequest) -> Result<Page> {
        self.raw
            .read_change_feed(request)
            .await
            .map_err(|err| diagnose(&self.options, err))
    }
}

/// Turns a resource type or a container name into a ready [`Container`].
#[derive(Clone)]
pub struct ContainerLocator {
    registry: Arc<ResourceRegistry>,
    cache: Arc<ConnectionCache>,
}

impl ContainerLocator {
    pub fn new(registry: Arc<ResourceRegistry>, cache: Arc<ConnectionCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    pub async fn locate<T: Resource>(&self, mode: ExecutionMode) -> Result<Container> {
        self.locate_by_type(T::type_key(), mode).await
    }

    pub async fn locate_by_type(
        &self,
        key: ResourceTypeKey,
        mode: ExecutionMode,
    ) -> Result<Container> {
        let binding = self.registry.resolve_key(key)?;
        let options = binding
            .options
            .clone()
            .unwrap_or_else(|| Arc::clone(self.registry.default_options()));
        let database = binding
            .database_name
            .clone()
            .unwrap_or_else(|| options.database_name.clone());

        self.open(options, &database, &binding.container_name, mode)
            .await
    }

    /// Ad-hoc access to a container no resource type is bound to.
    pub async fn locate_by_name(
        &self,
        container_name: &str,
        database_name: Option<&str>,
        mode: ExecutionMode,
    ) -> Result<Container> {
        let options = Arc::clone(self.registry.default_options());
        let database = database_name
            .map(str::to_string)
            .unwrap_or_else(|| options.database_name.clone());

        self.open(options, &database, container_name, mode).await
    }

    async fn open(
        &self,
        options: Arc<ConnectionOptions>,
        database: &str,
        container_name: &str,
        mode: ExecutionMode,
    ) -> Result<Container> {
        let handle = self.cache.get_handle(&options, mode).await?;
        Ok(Container {
            raw: handle.container(database, container_name)?,
            options,
            mode,
        })
    }

    /// Disposes every connection handle. Call once at shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        self.cache.dispose_all().await
    }
}
