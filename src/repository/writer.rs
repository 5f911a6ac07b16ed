use super::reader::Reader;
use super::retry::ConflictRetryPolicy;
use crate::core::{DocError, ErrorKind, Resource, Result, validate_address, validate_key};
use crate::interface::ExecutionMode;
use crate::registry::ContainerLocator;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

/// Typed writes for one resource type, including the optimistic-concurrency
/// read-modify-write protocols.
///
/// The retry loops are not locks: concurrent callers race freely and the
/// version token decides who wins each round.
pub struct Writer<T: Resource> {
    reader: Reader<T>,
}

impl<T: Resource> Clone for Writer<T> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
        }
    }
}

impl<T: Resource> Writer<T> {
    pub fn new(locator: ContainerLocator) -> Self {
        Self {
            reader: Reader::new(locator),
        }
    }

    /// Routes every operation through the bulk connection handle.
    pub fn bulk(self) -> Self {
        Self {
            reader: self.reader.with_mode(ExecutionMode::Bulk),
        }
    }

    pub fn reader(&self) -> &Reader<T> {
        &self.reader
    }

    /// Fails with `AlreadyExists` if the id is taken within the partition.
    pub async fn create(&self, resource: &T) -> Result<T> {
        validate_address(resource)?;
        let container = self.reader.container().await?;
        let serializer = &container.options().serializer;
        let body = serializer.to_document(resource)?;
        let stored = container
            .create_item(resource.document_id(), resource.partition_key(), body)
            .await?;
        serializer.from_document(stored)
    }

    /// Replaces the stored document if its version token still matches.
    ///
    /// Fails with `VersionConflict` on a stale token and `NotFound` if the
    /// document is gone. A resource without a token is rejected outright.
    pub async fn replace(&self, resource: &T) -> Result<T> {
        validate_address(resource)?;
        let etag = resource.version_token().ok_or_else(|| {
            DocError::InvalidDocument(format!(
                "{} '{}' has no version token to replace against",
                T::type_key(),
                resource.document_id()
            ))
        })?;
        let container = self.reader.container().await?;
        let serializer = &container.options().serializer;
        let body = serializer.to_document(resource)?;
        let stored = container
            .replace_item(
                resource.document_id(),
                resource.partition_key(),
                body,
                Some(etag),
            )
            .await?;
        serializer.from_document(stored)
    }

    /// Single shot; fails with `NotFound` if absent.
    pub async fn delete(&self, id: &str, partition_key: &str) -> Result<()> {
        validate_key::<T>(id, partition_key)?;
        let container = self.reader.container().await?;
        container.delete_item(id, partition_key).await
    }

    /// Like [`Writer::delete`] but reports absence as `false`.
    pub async fn delete_if_exists(&self, id: &str, partition_key: &str) -> Result<bool> {
        match self.delete(id, partition_key).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Read, mutate, replace; on a version conflict start over with a fresh
    /// read until the retry budget runs out.
    ///
    /// Only `VersionConflict` is retried. Cancellation is checked before
    /// every attempt.
    pub async fn update<F>(
        &self,
        id: &str,
        partition_key: &str,
        mut mutate: F,
        retry: impl Into<ConflictRetryPolicy>,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        F: FnMut(&mut T) + Send,
    {
        let resource = T::type_key();
        let policy = retry.into();
        let mut remaining = policy.max_retries;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(DocError::Cancelled);
            }
            attempt += 1;

            let mut current = self.reader.read(id, partition_key).await?;
            let token = current.version_token().map(str::to_string);
            mutate(&mut current);
            current.set_version_token(token);
            ensure_same_address(&current, id, partition_key)?;

            match self.replace(&current).await {
                Ok(updated) => return Ok(updated),
                Err(err) if err.kind() == ErrorKind::Conflict && remaining > 0 => {
                    remaining -= 1;
                    event!(
                        Level::DEBUG,
                        resource = %resource,
                        id,
                        attempt,
                        remaining,
                        "version conflict, retrying update"
                    );
                    policy.pause(attempt, cancel).await?;
                }
                Err(err) => {
                    if err.kind() == ErrorKind::Conflict {
                        event!(
                            Level::WARN,
                            resource = %resource,
                            id,
                            attempt,
                            "update retry budget exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Mutates the existing document, or the default if there is none.
    ///
    /// `make_default` runs once and must yield a non-empty id and partition
    /// key. Without a stored base the mutated default is created; otherwise
    /// it replaces the base. Both `VersionConflict` and `AlreadyExists` (a
    /// concurrent creator won) restart from the lookup, so racing callers
    /// converge on one document.
    pub async fn update_or_create<D, F>(
        &self,
        make_default: D,
        mut mutate: F,
        retry: impl Into<ConflictRetryPolicy>,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        D: FnOnce() -> T + Send,
        F: FnMut(&mut T) + Send,
    {
        let mut default = make_default();
        if default.document_id().is_empty() || default.partition_key().is_empty() {
            return Err(DocError::InvalidDefault(format!(
                "{} default must carry a document id and partition key",
                T::type_key()
            )));
        }
        default.set_version_token(None);
        let id = default.document_id().to_string();
        let partition_key = default.partition_key().to_string();

        let resource = T::type_key();
        let policy = retry.into();
        let mut remaining = policy.max_retries;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(DocError::Cancelled);
            }
            attempt += 1;

            let mut base = match self.reader.find(&id, &partition_key).await? {
                Some(existing) => existing,
                None => default.clone(),
            };
            let token = base.version_token().map(str::to_string);
            mutate(&mut base);
            base.set_version_token(token);
            ensure_same_address(&base, &id, &partition_key)?;

            let outcome = if base.version_token().is_none() {
                self.create(&base).await
            } else {
                self.replace(&base).await
            };

            match outcome {
                Ok(written) => return Ok(written),
                Err(err)
                    if matches!(err.kind(), ErrorKind::Conflict | ErrorKind::AlreadyExists)
                        && remaining > 0 =>
                {
                    remaining -= 1;
                    event!(
                        Level::DEBUG,
                        resource = %resource,
                        id = %id,
                        attempt,
                        remaining,
                        error = %err,
                        "write race lost, retrying update_or_create"
                    );
                    policy.pause(attempt, cancel).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn ensure_same_address<T: Resource>(resource: &T, id: &str, partition_key: &str) -> Result<()> {
    if resource.document_id() != id || resource.partition_key() != partition_key {
        return Err(DocError::InvalidDocument(format!(
            "mutation moved {} '{}/{}' to '{}/{}'",
            T::type_key(),
            partition_key,
            id,
            resource.partition_key(),
            resource.document_id()
        )));
    }
    Ok(())
}
