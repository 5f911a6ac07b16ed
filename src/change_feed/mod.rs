//! Change feed listener with per-partition fan-out.

pub mod dispatch;
pub mod handler;
pub mod lease;
pub mod options;
pub mod processor;

pub use dispatch::{DispatchOutcome, dispatch_batch, group_by_partition};
pub use handler::{ChangeHandler, FeedErrorHandler, HandlerFn, LogErrorHandler, handler_fn};
pub use lease::Lease;
pub use options::ChangeFeedOptions;
pub use processor::ChangeFeedProcessor;
