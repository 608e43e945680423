use std::os::fd::RawFd;

/// Readiness a descriptor is currently armed for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) fn is_none(self) -> bool {
        !self.read && !self.write
    }
}

/// Handle that interrupts a blocking poll from another thread.
///
/// Wraps the descriptor the backend listens on for wake-ups
/// (an `eventfd` on Linux, the write end of a pipe on macOS). The
/// descriptor is closed when the last handle goes away.
pub(crate) struct Waker(pub(crate) RawFd);

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}
