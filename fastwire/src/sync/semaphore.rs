use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A counting semaphore with a close sentinel.
///
/// Each [`release`](Self::release) adds one permit and each successful
/// [`acquire`](Self::acquire) consumes one, blocking the calling thread
/// while none are available. [`close`](Self::close) wakes every waiter;
/// once closed, `acquire` keeps handing out the permits that remain and
/// then returns `false` instead of blocking.
pub struct Semaphore {
    state: Mutex<State>,
    condvar: Condvar,
}

struct State {
    permits: usize,
    closed: bool,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                permits,
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The counter is updated in single statements; a poisoned guard
        // still holds a consistent value.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds one permit and wakes one waiter.
    pub fn release(&self) {
        let mut state = self.lock();
        state.permits += 1;
        drop(state);

        self.condvar.notify_one();
    }

    /// Takes one permit, blocking until one is available.
    ///
    /// Returns `false` if the semaphore was closed and has no permits left.
    pub fn acquire(&self) -> bool {
        let mut state = self.lock();

        loop {
            if state.permits > 0 {
                state.permits -= 1;
                return true;
            }

            if state.closed {
                return false;
            }

            state = self.condvar.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    ///
    /// Returns `None` on timeout.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if state.permits > 0 {
                state.permits -= 1;
                return Some(true);
            }

            if state.closed {
                return Some(false);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            state = self
                .condvar
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Takes one permit if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();

        if state.permits > 0 {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Closes the semaphore and wakes every waiter.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);

        self.condvar.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of permits currently available.
    pub fn available(&self) -> usize {
        self.lock().permits
    }
}
