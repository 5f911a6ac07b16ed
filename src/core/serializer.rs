use super::error::Result;
use super::resource::Resource;
use crate::interface::StoredDocument;
use serde_json::Value;

/// Serialization settings applied to outgoing documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SerializerOptions {
    /// Drop `null` fields instead of writing them to the store.
    pub ignore_null_values: bool,
}

impl SerializerOptions {
    pub fn ignore_null_values(mut self, ignore: bool) -> Self {
        self.ignore_null_values = ignore;
        self
    }

    pub fn to_document<T: Resource>(&self, resource: &T) -> Result<Value> {
        let mut body = serde_json::to_value(resource)?;
        if self.ignore_null_values {
            strip_nulls(&mut body);
        }
        Ok(body)
    }

    /// Decodes a stored document and stamps it with the store's version token.
    pub fn from_document<T: Resource>(&self, document: StoredDocument) -> Result<T> {
        let mut resource: T = serde_json::from_value(document.body)?;
        resource.set_version_token(Some(document.etag));
        Ok(resource)
    }
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}
