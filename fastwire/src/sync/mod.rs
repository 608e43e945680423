//! Thread synchronization primitives.
//!
//! - [`Semaphore`] — a counting wake primitive with a close sentinel, used
//!   by the [`BlockingReader`](crate::adapter::BlockingReader) to park its
//!   consumer until bytes arrive or the connection goes away.

mod semaphore;

pub use semaphore::Semaphore;
