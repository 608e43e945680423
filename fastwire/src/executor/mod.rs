//! Explicitly owned execution contexts.
//!
//! - [`SerialQueue`]: the single serialized writer context shared by all
//!   connections.
//! - [`WorkerPool`]: threads for consumers that block, such as FastCGI
//!   channel readers.
//!
//! Both are created at server start and stopped on drop. Components
//! receive a [`QueueHandle`] to submit work instead of reaching for a
//! process-wide queue.

mod pool;
mod queue;
mod serial;

pub use pool::WorkerPool;
pub use queue::{Job, QueueHandle};
pub use serial::SerialQueue;
