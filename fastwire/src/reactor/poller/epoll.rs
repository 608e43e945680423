//! Linux `epoll`-based poller implementation.
//!
//! Descriptors are registered level-triggered and identified by their
//! own descriptor number, so a socket carrying both a read and a write
//! registration occupies a single epoll entry whose interest mask is the
//! union of the two. The reactor keeps that union and calls
//! [`EpollPoller::update`] whenever it changes.

use super::common::{Interest, Waker};
use crate::reactor::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used internally for the wake-up event.
///
/// Descriptors are non-negative `i32`s, so `u64::MAX` never collides.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// Owns the epoll instance, an `eventfd` used as a wake-up signal and a
/// reusable event buffer.
pub(crate) struct EpollPoller {
    epoll: RawFd,
    events: Vec<epoll_event>,
    waker: Arc<Waker>,
}

unsafe impl Send for EpollPoller {}

impl Waker {
    /// Wake the poller by bumping the internal `eventfd`.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }
}

impl EpollPoller {
    /// Create a new `EpollPoller` able to report `capacity` events per poll.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(eventfd);
                libc::close(epoll);
            }
            return Err(err);
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(capacity.max(1)),
            waker: Arc::new(Waker(eventfd)),
        })
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Move `fd` from interest `old` to interest `new`.
    ///
    /// Adds the descriptor on its first interest, modifies it while some
    /// interest remains and deletes it once nothing is armed.
    pub(crate) fn update(&self, fd: RawFd, old: Interest, new: Interest) -> io::Result<()> {
        if old == new {
            return Ok(());
        }

        if new.is_none() {
            let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            return check(rc);
        }

        let mut flags = EPOLLRDHUP;

        if new.read {
            flags |= EPOLLIN;
        }
        if new.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: fd as u64,
        };

        let op = if old.is_none() {
            EPOLL_CTL_ADD
        } else {
            EPOLL_CTL_MOD
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        check(rc)
    }

    /// Poll for readiness events.
    ///
    /// Blocks until a descriptor becomes ready, the waker fires, or the
    /// optional timeout expires. `EINTR` is reported as an empty batch.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let timeout_ms = timeout.map(|t| t.as_millis() as i32).unwrap_or(-1);

        events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            if ev.u64 == WAKE_TOKEN {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.waker.0, &mut buf as *mut _ as *mut _, 8);
                }
                continue;
            }

            // A hung-up or failed socket is reported readable so the
            // read path observes the zero-byte read or the error.
            let readable =
                ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP | EPOLLRDHUP) as u32) != 0;
            let writable = ev.events & ((EPOLLOUT | EPOLLERR | EPOLLHUP) as u32) != 0;

            events.push(Event {
                token: ev.u64 as usize,
                readable,
                writable,
            });
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}

fn check(rc: i32) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
