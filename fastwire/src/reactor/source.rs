use std::io;
use std::os::fd::RawFd;

/// Callback invoked on the reactor thread when a registration fires.
///
/// Callbacks run on the shared readiness context and must never block.
pub type ReadyCallback = Box<dyn FnMut() + Send>;

/// Which readiness a registration waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Persistent: fires every time the descriptor is readable until
    /// cancelled or disarmed.
    Read,

    /// One-shot: fires once, then stays disarmed until [`Registrar::rearm`].
    Write,
}

/// A live readiness registration.
///
/// Cheap to copy; the reactor owns the callback. A registration is
/// released with [`Registrar::cancel`], never by dropping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
    pub(crate) token: usize,
    pub(crate) fd: RawFd,
    pub(crate) direction: Direction,
}

impl Registration {
    /// Builds a registration value for an out-of-tree [`Registrar`].
    pub fn new(token: usize, fd: RawFd, direction: Direction) -> Self {
        Self {
            token,
            fd,
            direction,
        }
    }

    pub fn token(&self) -> usize {
        self.token
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// The platform event registration capability.
///
/// [`crate::reactor::ReactorHandle`] is the production implementation.
/// Socket handlers only ever talk to this trait, which keeps the
/// platform mechanism behind a single seam.
pub trait Registrar: Send + Sync {
    /// Registers `callback` to run whenever `fd` is readable.
    fn register_read(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<Registration>;

    /// Registers `callback` to run once when `fd` becomes writable.
    fn register_write(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<Registration>;

    /// Re-enables a fired write registration or a disarmed one.
    fn rearm(&self, registration: Registration);

    /// Stops a registration from firing until [`rearm`](Self::rearm).
    fn disarm(&self, registration: Registration);

    /// Removes the registration.
    ///
    /// Cancellation completes asynchronously: `on_cancelled` runs once the
    /// descriptor is no longer watched, and only then may it be closed.
    fn cancel(&self, registration: Registration, on_cancelled: Box<dyn FnOnce() + Send>);
}
