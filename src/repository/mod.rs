pub mod reader;
pub mod retry;
pub mod writer;

pub use reader::{DEFAULT_PAGE_SIZE, Reader};
pub use retry::ConflictRetryPolicy;
pub use writer::Writer;
