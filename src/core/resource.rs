use super::error::{DocError, Result};
use super::type_key::ResourceTypeKey;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Contract every stored entity satisfies.
///
/// `version_token` is owned by the store: readers and writers populate it
/// from response metadata, application code only passes it back.
///
/// # Examples
///
/// ```
/// use docbind::Resource;
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
/// ```
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn document_id(&self) -> &str;

    fn partition_key(&self) -> &str;

    fn version_token(&self) -> Option<&str>;

    fn set_version_token(&mut self, token: Option<String>);

    /// Key used to resolve this type's container binding.
    ///
    /// Generic resources override this with
    /// [`ResourceTypeKey::of_family_member`] so that a family-wide binding
    /// covers every instantiation.
    fn type_key() -> ResourceTypeKey
    where
        Self: Sized,
    {
        ResourceTypeKey::of::<Self>()
    }
}

/// Checks that a resource carries both halves of its storage address.
pub fn validate_address<T: Resource>(resource: &T) -> Result<()> {
    validate_key::<T>(resource.document_id(), resource.partition_key())
}

/// Checks a bare `(id, partition key)` pair before it reaches the store.
pub fn validate_key<T: Resource>(id: &str, partition_key: &str) -> Result<()> {
    if id.is_empty() {
        return Err(DocError::InvalidDocument(format!(
            "{} has an empty document id",
            T::type_key()
        )));
    }
    if partition_key.is_empty() {
        return Err(DocError::InvalidDocument(format!(
            "{} '{}' has an empty partition key",
            T::type_key(),
            id
        )));
    }
    Ok(())
}
