use crate::core::{DocError, Resource, Result};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

/// Application callback for one partition's share of a change batch.
///
/// Errors fail only this invocation; the dispatcher reports them and moves
/// on. Retrying is up to the handler.
#[async_trait]
pub trait ChangeHandler<T: Resource>: Send + Sync + 'static {
    async fn handle(
        &self,
        partition_key: &str,
        changes: Vec<T>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Receives failures raised while a listener runs, tagged by lease token.
#[async_trait]
pub trait FeedErrorHandler: Send + Sync + 'static {
    async fn on_error(&self, lease_token: &str, error: &DocError);
}

/// Logs listener failures.
pub struct LogErrorHandler;

#[async_trait]
impl FeedErrorHandler for LogErrorHandler {
    async fn on_error(&self, lease_token: &str, error: &DocError) {
        event!(Level::ERROR, lease = lease_token, error = %error, "change feed error");
    }
}

/// Adapts an async closure into a [`ChangeHandler`].
pub struct HandlerFn<F, T> {
    f: F,
    _resource: PhantomData<fn(T)>,
}

/// # Examples
///
/// ```no_run
/// # use docbind::change_feed::handler_fn;
/// # #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// # struct Order { id: String, customer: String }
/// # impl docbind::Resource for Order {
/// #     fn document_id(&self) -> &str { &self.id }
/// #     fn partition_key(&self) -> &str { &self.customer }
/// #     fn version_token(&self) -> Option<&str> { None }
/// #     fn set_version_token(&mut self, _: Option<String>) {}
/// # }
/// let handler = handler_fn(|customer: String, orders: Vec<Order>| async move {
///     println!("{customer}: {} changed", orders.len());
///     Ok::<(), docbind::DocError>(())
/// });
/// ```
pub fn handler_fn<T, F, Fut>(f: F) -> HandlerFn<F, T>
where
    T: Resource,
    F: Fn(String, Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    HandlerFn {
        f,
        _resource: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> ChangeHandler<T> for HandlerFn<F, T>
where
    T: Resource,
    F: Fn(String, Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(
        &self,
        partition_key: &str,
        changes: Vec<T>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        (self.f)(partition_key.to_string(), changes).await
    }
}
