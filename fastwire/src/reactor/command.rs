use super::source::{Direction, ReadyCallback};

use std::os::fd::RawFd;

pub(crate) enum Command {
    Register {
        token: usize,
        fd: RawFd,
        direction: Direction,
        callback: ReadyCallback,
    },
    Rearm {
        token: usize,
    },
    Disarm {
        token: usize,
    },
    Cancel {
        token: usize,
        on_cancelled: Box<dyn FnOnce() + Send>,
    },
    Shutdown,
}
