use super::Engine;

use std::io;
use std::thread;
use std::time::Duration;

/// Builder for configuring and creating an engine.
///
/// # Examples
///
/// ```rust,ignore
/// let engine = EngineBuilder::new()
///     .worker_threads(4)
///     .keep_alive(Duration::from_secs(15))
///     .build()?;
/// ```
pub struct EngineBuilder {
    /// Number of threads in the worker pool.
    pub(crate) worker_threads: usize,

    /// Scratch buffer size for each transport read.
    pub(crate) read_chunk_size: usize,

    /// Idle time after which a connection may be reaped.
    pub(crate) keep_alive: Duration,

    /// Maximum events reported by one poll.
    pub(crate) event_capacity: usize,
}

impl EngineBuilder {
    /// Creates a new `EngineBuilder` with default configuration.
    ///
    /// By default the worker pool has one thread per available logical
    /// CPU, falling back to `1` if unavailable.
    pub fn new() -> Self {
        let worker_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            worker_threads,
            read_chunk_size: 4096,
            keep_alive: Duration::from_secs(5),
            event_capacity: 64,
        }
    }

    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.worker_threads = n;
        self
    }

    /// Sets the scratch buffer size used while draining a readable
    /// connection.
    ///
    /// # Panics
    ///
    /// Panics if `bytes == 0`.
    pub fn read_chunk_size(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "read_chunk_size must be > 0");

        self.read_chunk_size = bytes;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets how many readiness events one poll call can report.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "event_capacity must be > 0");

        self.event_capacity = n;
        self
    }

    /// Builds the engine with the configured options.
    ///
    /// This starts the reactor thread, the writer thread and the worker
    /// pool.
    pub fn build(self) -> io::Result<Engine> {
        Engine::new(self)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let builder = EngineBuilder::new();

        assert!(builder.worker_threads >= 1);
        assert_eq!(builder.read_chunk_size, 4096);
        assert_eq!(builder.keep_alive, Duration::from_secs(5));
        assert_eq!(builder.event_capacity, 64);
    }

    #[test]
    #[should_panic(expected = "worker_threads must be > 0")]
    fn test_zero_worker_threads_panics() {
        let _ = EngineBuilder::new().worker_threads(0);
    }

    #[test]
    #[should_panic(expected = "read_chunk_size must be > 0")]
    fn test_zero_read_chunk_panics() {
        let _ = EngineBuilder::new().read_chunk_size(0);
    }
}
