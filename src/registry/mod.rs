//! Resource-to-container resolution.

pub mod locator;

pub use locator::{Container, ContainerLocator};

use crate::connection::ConnectionOptions;
use crate::core::{DocError, Resource, ResourceTypeKey, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{Level, event};

/// Where a resource type is stored. Immutable once registered.
#[derive(Debug, Clone)]
pub struct ContainerBinding {
    pub resource: ResourceTypeKey,
    pub container_name: String,
    /// Falls back to the connection options' database when `None`.
    pub database_name: Option<String>,
    /// Falls back to the registry's default options when `None`.
    pub options: Option<Arc<ConnectionOptions>>,
}

/// Registry of container bindings.
///
/// Each resource type is bound at most once for the registry's lifetime. A
/// generic family and any of its concrete instantiations are mutually
/// exclusive: whichever is registered first owns the family.
///
/// # Examples
///
/// ```
/// use docbind::{ConnectionOptions, ResourceRegistry, ResourceTypeKey};
///
/// let registry = ResourceRegistry::new(ConnectionOptions::emulator("key"));
/// registry
///     .register_key(ResourceTypeKey::family("Counter"), "counters", Some("stats"), None)
///     .unwrap();
///
/// // a second owner for the same family is rejected
/// assert!(registry
///     .register_key(ResourceTypeKey::family("Counter"), "other", None, None)
///     .is_err());
/// ```
pub struct ResourceRegistry {
    bindings: RwLock<HashMap<ResourceTypeKey, Arc<ContainerBinding>>>,
    default_options: Arc<ConnectionOptions>,
}

impl ResourceRegistry {
    pub fn new(default_options: ConnectionOptions) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            default_options: Arc::new(default_options),
        }
    }

    /// Options used by bindings that carry none of their own.
    pub fn default_options(&self) -> &Arc<ConnectionOptions> {
        &self.default_options
    }

    /// Binds `T` (or its family, if `T` is a family member resolved through
    /// [`Resource::type_key`]) to a container.
    pub fn register<T: Resource>(
        &self,
        container_name: &str,
        database_name: Option<&str>,
        options: Option<ConnectionOptions>,
    ) -> Result<Arc<ContainerBinding>> {
        self.register_key(T::type_key(), container_name, database_name, options)
    }

    /// Binds every instantiation of a generic family to one container.
    pub fn register_family(
        &self,
        tag: &'static str,
        container_name: &str,
        database_name: Option<&str>,
        options: Option<ConnectionOptions>,
    ) -> Result<Arc<ContainerBinding>> {
        self.register_key(
            ResourceTypeKey::family(tag),
            container_name,
            database_name,
            options,
        )
    }

    pub fn register_key(
        &self,
        key: ResourceTypeKey,
        container_name: &str,
        database_name: Option<&str>,
        options: Option<ConnectionOptions>,
    ) -> Result<Arc<ContainerBinding>> {
        if container_name.is_empty() {
            return Err(DocError::InvalidConfig(format!(
                "Container name for '{key}' cannot be empty"
            )));
        }
        if let Some(options) = &options {
            options.validate()?;
        }

        let mut bindings = self.bindings.write()?;

        if bindings.contains_key(&key) {
            return Err(DocError::DuplicateRegistration(key.to_string()));
        }
        match key {
            ResourceTypeKey::Concrete { .. } => {
                if let Some(family) = key.family_key() {
                    if bindings.contains_key(&family) {
                        return Err(DocError::DuplicateRegistration(format!(
                            "{key} (family {family} is already bound)"
                        )));
                    }
                }
            }
            ResourceTypeKey::Family(tag) => {
                let member = bindings.values().find(|b| {
                    matches!(b.resource, ResourceTypeKey::Concrete { family: Some(f), .. } if f == tag)
                });
                if let Some(member) = member {
                    return Err(DocError::DuplicateRegistration(format!(
                        "{key} (member {} is already bound)",
                        member.resource
                    )));
                }
            }
        }

        let binding = Arc::new(ContainerBinding {
            resource: key,
            container_name: container_name.to_string(),
            database_name: database_name.map(str::to_string),
            options: options.map(Arc::new),
        });
        bindings.insert(key, Arc::clone(&binding));

        event!(
            Level::DEBUG,
            resource = %key,
            container = container_name,
            database = database_name.unwrap_or("<default>"),
            "container binding registered"
        );
        Ok(binding)
    }

    pub fn resolve<T: Resource>(&self) -> Result<Arc<ContainerBinding>> {
        self.resolve_key(T::type_key())
    }

    /// Exact match first, then the key's generic family.
    pub fn resolve_key(&self, key: ResourceTypeKey) -> Result<Arc<ContainerBinding>> {
        let bindings = self.bindings.read()?;
        bindings
            .get(&key)
            .or_else(|| key.family_key().and_then(|family| bindings.get(&family)))
            .cloned()
            .ok_or_else(|| DocError::UnknownResource(key.to_string()))
    }

    pub fn is_registered(&self, key: ResourceTypeKey) -> bool {
        self.resolve_key(key).is_ok()
    }

    /// Snapshot of every binding, in no particular order.
    pub fn bindings(&self) -> Result<Vec<Arc<ContainerBinding>>> {
        Ok(self.bindings.read()?.values().cloned().collect())
    }
}
