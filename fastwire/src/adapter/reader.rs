use crate::sync::Semaphore;

use log::trace;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A hand-off buffer that lets a blocking consumer read bytes delivered
/// asynchronously by a producer.
///
/// The producer (a processor running on the reactor thread) calls
/// [`add_data_to_read`](Self::add_data_to_read), which never blocks on
/// the consumer. The consumer (a worker thread) calls
/// [`read`](Self::read), which parks until bytes are available and then
/// takes everything buffered in one shot.
///
/// The wake signal counts empty-to-non-empty transitions of the buffer.
/// Each `read` consumes exactly one of them, so the number of wake-ups
/// equals the number of drains and no read ever observes a stale signal.
///
/// The buffer and its flags are only touched under the guard. `read`
/// assumes a single consumer; any number of producers may call
/// `add_data_to_read` concurrently.
///
/// [`close`](Self::close) is the teardown sentinel: it releases a parked
/// consumer, and `read` returns `0` once the remaining bytes are drained.
pub struct BlockingReader {
    shared: Mutex<Shared>,
    signal: Semaphore,
}

#[derive(Default)]
struct Shared {
    buffer: Vec<u8>,
    data_available: bool,
    closed: bool,
}

impl BlockingReader {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared::default()),
            signal: Semaphore::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `bytes` and wakes the consumer if the buffer was empty.
    ///
    /// Bytes arriving after [`close`](Self::close) are discarded.
    pub fn add_data_to_read(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let mut shared = self.lock();

        if shared.closed {
            trace!("dropping {} bytes delivered after close", bytes.len());
            return;
        }

        let was_empty = shared.buffer.is_empty();

        shared.buffer.extend_from_slice(bytes);
        shared.data_available = true;

        if was_empty {
            self.signal.release();
        }
    }

    /// Blocks until data is available, then moves all of it into `into`.
    ///
    /// Returns the number of bytes appended. `0` means the reader was
    /// closed and everything delivered before the close has been read.
    pub fn read(&self, into: &mut Vec<u8>) -> usize {
        if !self.signal.acquire() {
            return 0;
        }

        self.drain(into)
    }

    /// Like [`read`](Self::read) but gives up after `timeout`.
    ///
    /// Returns `None` if nothing arrived in time.
    pub fn read_timeout(&self, into: &mut Vec<u8>, timeout: Duration) -> Option<usize> {
        match self.signal.acquire_timeout(timeout)? {
            true => Some(self.drain(into)),
            false => Some(0),
        }
    }

    fn drain(&self, into: &mut Vec<u8>) -> usize {
        let mut shared = self.lock();

        let n = shared.buffer.len();
        into.append(&mut shared.buffer);
        shared.data_available = false;

        n
    }

    /// Whether bytes are waiting to be read.
    pub fn has_data(&self) -> bool {
        self.lock().data_available
    }

    /// Delivers the teardown sentinel.
    ///
    /// A consumer parked in [`read`](Self::read) wakes up. Buffered bytes
    /// are still handed out; after that every read returns `0`.
    pub fn close(&self) {
        let mut shared = self.lock();

        if shared.closed {
            return;
        }

        shared.closed = true;
        drop(shared);

        self.signal.close();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for BlockingReader {
    fn default() -> Self {
        Self::new()
    }
}
