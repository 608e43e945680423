//! Platform-specific readiness poller.
//!
//! One event-multiplexing mechanism is compiled in per target:
//! `epoll` on Linux and `kqueue` on macOS. Both expose the same
//! surface to the reactor:
//! - `update` arms, re-arms or removes read/write interest for a descriptor,
//! - `poll` blocks until readiness or a wake-up,
//! - `waker` hands out a handle that interrupts `poll` from other threads.

pub(crate) mod common;

pub(crate) use common::{Interest, Waker};

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
