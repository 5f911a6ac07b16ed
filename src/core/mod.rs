pub mod error;
pub mod resource;
pub mod serializer;
pub mod type_key;

pub use error::{DocError, ErrorKind, Result};
pub use resource::{Resource, validate_address, validate_key};
pub use serializer::SerializerOptions;
pub use type_key::ResourceTypeKey;
