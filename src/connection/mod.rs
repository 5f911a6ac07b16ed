pub mod cache;
pub mod config;
pub mod diagnostics;

pub use cache::ConnectionCache;
pub use config::{ConnectionOptions, Credential, DEFAULT_DATABASE_THROUGHPUT, EMULATOR_ENDPOINT};
