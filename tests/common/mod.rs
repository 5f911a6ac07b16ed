#![allow(dead_code)]

use docbind::memory::MemoryStore;
use docbind::{ConnectionOptions, DocClient, Resource, ResourceTypeKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer: String,
    pub total: i64,
    pub status: String,
    #[serde(skip)]
    pub etag: Option<String>,
}

impl Order {
    pub fn new(id: &str, customer: &str, total: i64) -> Self {
        Self {
            id: id.to_string(),
            customer: customer.to_string(),
            total,
            status: "open".to_string(),
            etag: None,
        }
    }
}

impl Resource for Order {
    fn document_id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.customer
    }

    fn version_token(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_version_token(&mut self, token: Option<String>) {
        self.etag = token;
    }
}

/// Generic resource; every instantiation belongs to the `Counter` family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter<V> {
    pub id: String,
    pub scope: String,
    pub value: V,
    #[serde(skip)]
    pub etag: Option<String>,
}

impl<V> Counter<V> {
    pub fn new(id: &str, scope: &str, value: V) -> Self {
        Self {
            id: id.to_string(),
            scope: scope.to_string(),
            value,
            etag: None,
        }
    }
}

impl<V> Resource for Counter<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn document_id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.scope
    }

    fn version_token(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_version_token(&mut self, token: Option<String>) {
        self.etag = token;
    }

    fn type_key() -> ResourceTypeKey {
        ResourceTypeKey::of_family_member::<Self>("Counter")
    }
}

/// Client over a fresh store with `Order` bound to `shop/orders`.
pub fn order_client() -> (DocClient, MemoryStore) {
    let store = MemoryStore::new();
    let client = DocClient::with_memory_store(
        &store,
        ConnectionOptions::emulator("test-key").database("shop"),
    );
    client.register::<Order>("orders").unwrap();
    (client, store)
}
