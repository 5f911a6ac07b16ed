use crate::core::{DocError, Resource, Result, SerializerOptions};
use crate::interface::{ExecutionMode, QueryRequest};
use crate::query::Query;
use crate::registry::{Container, ContainerLocator};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Typed point reads and queries for one resource type.
pub struct Reader<T: Resource> {
    locator: ContainerLocator,
    mode: ExecutionMode,
    page_size: usize,
    _resource: PhantomData<fn() -> T>,
}

impl<T: Resource> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Self {
            locator: self.locator.clone(),
            mode: self.mode,
            page_size: self.page_size,
            _resource: PhantomData,
        }
    }
}

#[derive(Default)]
struct QueryCursor {
    container: Option<Container>,
    continuation: Option<String>,
    exhausted: bool,
}

impl<T: Resource> Reader<T> {
    pub fn new(locator: ContainerLocator) -> Self {
        Self {
            locator,
            mode: ExecutionMode::Standard,
            page_size: DEFAULT_PAGE_SIZE,
            _resource: PhantomData,
        }
    }

    pub(crate) fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Items requested per query page.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub async fn container(&self) -> Result<Container> {
        self.locator.locate::<T>(self.mode).await
    }

    /// Returns `None` for an absent document; other failures propagate.
    pub async fn find(&self, id: &str, partition_key: &str) -> Result<Option<T>> {
        match self.read(id, partition_key).await {
            Ok(resource) => Ok(Some(resource)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Fails with `NotFound` for an absent document.
    pub async fn read(&self, id: &str, partition_key: &str) -> Result<T> {
        let container = self.container().await?;
        let document = container.read_item(id, partition_key).await?;
        container.options().serializer.from_document(document)
    }

    pub async fn exists(&self, id: &str, partition_key: &str) -> Result<bool> {
        Ok(self.find(id, partition_key).await?.is_some())
    }

    /// Lazily pages through matching documents.
    ///
    /// `partition_key == None` queries across partitions. The sequence ends
    /// early once `cancel` fires; to restart, call `query` again.
    pub fn query(
        &self,
        query: Query,
        partition_key: Option<&str>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<T>> {
        let locator = self.locator.clone();
        let mode = self.mode;
        let page_size = self.page_size;
        let partition_key = partition_key.map(str::to_string);

        stream::try_unfold(QueryCursor::default(), move |cursor| {
            fetch_page::<T>(
                locator.clone(),
                mode,
                query.clone(),
                partition_key.clone(),
                page_size,
                cancel.clone(),
                cursor,
            )
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<T, DocError>)))
        .try_flatten()
        .boxed()
    }

    pub async fn query_all(&self, query: Query, partition_key: Option<&str>) -> Result<Vec<T>> {
        self.query(query, partition_key, CancellationToken::new())
            .try_collect()
            .await
    }

    pub async fn count(&self, query: Query, partition_key: Option<&str>) -> Result<usize> {
        self.query(query, partition_key, CancellationToken::new())
            .try_fold(0usize, |n, _| async move { Ok(n + 1) })
            .await
    }
}

async fn fetch_page<T: Resource>(
    locator: ContainerLocator,
    mode: ExecutionMode,
    query: Query,
    partition_key: Option<String>,
    page_size: usize,
    cancel: CancellationToken,
    mut cursor: QueryCursor,
) -> Result<Option<(Vec<T>, QueryCursor)>> {
    if cursor.exhausted || cancel.is_cancelled() {
        return Ok(None);
    }
    let container = match cursor.container.clone() {
        Some(container) => container,
        None => {
            let container = locator.locate::<T>(mode).await?;
            cursor.container = Some(container.clone());
            container
        }
    };

    let request = QueryRequest {
        query,
        partition_key,
        continuation: cursor.continuation.take(),
        max_item_count: page_size,
        continuation_token_limit_kb: None,
    };
    let page = tokio::select! {
        _ = cancel.cancelled() => return Ok(None),
        page = container.query_items(request) => page?,
    };

    cursor.exhausted = page.continuation.is_none();
    cursor.continuation = page.continuation;

    let serializer: &SerializerOptions = &container.options().serializer;
    let items = page
        .items
        .into_iter()
        .map(|document| serializer.from_document(document))
        .collect::<Result<Vec<T>>>()?;
    Ok(Some((items, cursor)))
}
