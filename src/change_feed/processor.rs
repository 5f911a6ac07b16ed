use super::dispatch::dispatch_batch;
use super::handler::{ChangeHandler, FeedErrorHandler, LogErrorHandler};
use super::lease::{Lease, LeaseStore};
use super::options::ChangeFeedOptions;
use crate::core::{DocError, Resource, Result};
use crate::interface::{ChangeFeedRequest, ExecutionMode, StoredDocument};
use crate::registry::{Container, ContainerLocator};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, event, info_span};

/// Listens to the change feed of `T`'s container and fans every batch out
/// to a [`ChangeHandler`], one invocation per partition key.
///
/// Progress is checkpointed in the lease container after each fully
/// dispatched batch; a restart with the same instance name resumes there.
/// Delivery is at least once.
pub struct ChangeFeedProcessor<T: Resource> {
    locator: ContainerLocator,
    handler: Arc<dyn ChangeHandler<T>>,
    errors: Arc<dyn FeedErrorHandler>,
    options: ChangeFeedOptions,
    worker: Mutex<Option<FeedWorker>>,
}

struct FeedWorker {
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl Drop for FeedWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

impl<T: Resource> ChangeFeedProcessor<T> {
    pub fn new(
        locator: ContainerLocator,
        handler: impl ChangeHandler<T>,
        options: ChangeFeedOptions,
    ) -> Self {
        Self {
            locator,
            handler: Arc::new(handler),
            errors: Arc::new(LogErrorHandler),
            options,
            worker: Mutex::new(None),
        }
    }

    /// Replaces the default error handler, which only logs.
    pub fn with_error_handler(mut self, errors: impl FeedErrorHandler) -> Self {
        self.errors = Arc::new(errors);
        self
    }

    pub fn options(&self) -> &ChangeFeedOptions {
        &self.options
    }

    pub fn lease_token(&self) -> String {
        self.options.lease_token()
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Resolves both containers, loads the lease and starts polling.
    ///
    /// Fails with `AlreadyRunning` while a previous start is active.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        let token = self.options.lease_token();
        if worker.is_some() {
            return Err(DocError::AlreadyRunning(token));
        }
        self.options.validate()?;

        let feed = self.locator.locate::<T>(ExecutionMode::Standard).await?;
        let lease_container = self
            .locator
            .locate_by_name(
                &self.options.lease_container,
                self.options.lease_database.as_deref(),
                ExecutionMode::Standard,
            )
            .await?;
        let leases = LeaseStore::new(
            lease_container,
            token.clone(),
            &self.options.processor_name,
            &self.options.instance_name,
        );
        let lease = leases.acquire().await?;

        let cancel = CancellationToken::new();
        let resource = T::type_key();
        let span = info_span!("change_feed", resource = %resource, lease = %token);
        let feed_loop = FeedLoop {
            feed,
            leases,
            lease,
            handler: Arc::clone(&self.handler),
            errors: Arc::clone(&self.errors),
            options: self.options.clone(),
            token: token.clone(),
            cancel: cancel.clone(),
        };
        let join_handle = tokio::spawn(feed_loop.run().instrument(span));

        event!(Level::INFO, lease = %token, "change feed started");
        *worker = Some(FeedWorker {
            cancel,
            join_handle: Some(join_handle),
        });
        Ok(())
    }

    /// Signals the poll loop and waits for the in-flight batch to drain.
    ///
    /// A no-op when not running.
    pub async fn stop(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        let Some(mut running) = worker.take() else {
            return Ok(());
        };

        running.cancel.cancel();
        if let Some(join_handle) = running.join_handle.take() {
            join_handle
                .await
                .map_err(|err| DocError::Internal(format!("change feed worker join: {err}")))?;
        }
        event!(Level::INFO, lease = %self.options.lease_token(), "change feed stopped");
        Ok(())
    }
}

struct FeedLoop<T: Resource> {
    feed: Container,
    leases: LeaseStore,
    lease: Lease,
    handler: Arc<dyn ChangeHandler<T>>,
    errors: Arc<dyn FeedErrorHandler>,
    options: ChangeFeedOptions,
    token: String,
    cancel: CancellationToken,
}

impl<T: Resource> FeedLoop<T> {
    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let request = ChangeFeedRequest {
                continuation: self.lease.continuation.clone(),
                max_item_count: self.options.max_items_per_poll,
            };
            let page = tokio::select! {
                _ = self.cancel.cancelled() => break,
                page = self.feed.read_change_feed(request) => page,
            };

            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    self.report(&err).await;
                    if self.idle().await {
                        continue;
                    }
                    break;
                }
            };

            if page.items.is_empty() {
                if self.idle().await {
                    continue;
                }
                break;
            }

            let changes = self.decode(page.items).await;
            let count = changes.len();
            let outcome = dispatch_batch(
                &self.handler,
                changes,
                self.options.max_degree_of_parallelism,
                &self.cancel,
            )
            .await;
            for (_, err) in &outcome.failures {
                self.report(err).await;
            }
            if !outcome.completed {
                // Stopped mid-batch; the batch is redelivered from the last checkpoint.
                break;
            }

            event!(
                Level::DEBUG,
                changes = count,
                invocations = outcome.invocations,
                failed = outcome.failures.len(),
                "change batch dispatched"
            );
            let next = page.continuation.or_else(|| self.lease.continuation.clone());
            self.checkpoint(next).await;
        }
    }

    /// Sleeps out the poll delay; false once cancelled.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.options.feed_poll_delay) => true,
        }
    }

    async fn decode(&self, documents: Vec<StoredDocument>) -> Vec<T> {
        let serializer = &self.feed.options().serializer;
        let mut changes = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document.id.clone();
            match serializer.from_document::<T>(document) {
                Ok(change) => changes.push(change),
                Err(err) => {
                    event!(Level::WARN, id = %id, error = %err, "skipping undecodable change");
                    self.report(&err).await;
                }
            }
        }
        changes
    }

    async fn checkpoint(&mut self, continuation: Option<String>) {
        match self.leases.checkpoint(&self.lease, continuation.clone()).await {
            Ok(lease) => self.lease = lease,
            Err(err) => {
                // Keep going from the new position; a restart may redeliver.
                self.lease.continuation = continuation;
                self.report(&err).await;
            }
        }
    }

    async fn report(&self, err: &DocError) {
        self.errors.on_error(&self.token, err).await;
    }
}
