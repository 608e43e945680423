//! macOS `kqueue`-based poller implementation.
//!
//! Exposes the same surface as the Linux `epoll` backend. Read and write
//! interest map onto separate `EVFILT_READ` / `EVFILT_WRITE` filters; the
//! reactor still hands over the combined interest so both backends share
//! one calling convention. Wake-ups travel through a non-blocking pipe
//! whose read end is watched under a reserved token.

use super::common::{Interest, Waker};
use crate::reactor::event::Event;

use libc::{
    EV_ADD, EV_DELETE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE, kevent, kqueue, timespec,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved ident marker stored in `udata` for the wake pipe.
const WAKE_TOKEN: usize = usize::MAX;

pub(crate) struct KqueuePoller {
    kq: RawFd,
    wake_read: RawFd,
    events: Vec<kevent>,
    waker: Arc<Waker>,
}

unsafe impl Send for KqueuePoller {}

impl Waker {
    /// Wake the poller by writing one byte into the wake pipe.
    pub(crate) fn wake(&self) {
        let buf: u8 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 1);
        }
    }
}

fn change(fd: RawFd, filter: i16, flags: u16, udata: usize) -> kevent {
    kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: udata as *mut _,
    }
}

impl KqueuePoller {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut fds = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(kq) };
            return Err(err);
        }

        for fd in fds {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }

        let poller = Self {
            kq,
            wake_read: fds[0],
            events: Vec::with_capacity(capacity.max(1)),
            waker: Arc::new(Waker(fds[1])),
        };

        poller.submit(&[change(fds[0], EVFILT_READ, EV_ADD, WAKE_TOKEN)])?;

        Ok(poller)
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Move `fd` from interest `old` to interest `new`, adding or deleting
    /// only the filters whose state changed.
    pub(crate) fn update(&self, fd: RawFd, old: Interest, new: Interest) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);

        if old.read != new.read {
            let flags = if new.read { EV_ADD } else { EV_DELETE };
            changes.push(change(fd, EVFILT_READ, flags, fd as usize));
        }

        if old.write != new.write {
            let flags = if new.write { EV_ADD } else { EV_DELETE };
            changes.push(change(fd, EVFILT_WRITE, flags, fd as usize));
        }

        if changes.is_empty() {
            return Ok(());
        }

        self.submit(&changes)
    }

    fn submit(&self, changes: &[kevent]) -> io::Result<()> {
        let rc = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };

        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs() as _,
            tv_nsec: t.subsec_nanos() as _,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const timespec)
            .unwrap_or(std::ptr::null());

        events.clear();

        let n = unsafe {
            libc::kevent(
                self.kq,
                std::ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts_ptr,
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
            if ev.udata as usize == WAKE_TOKEN {
                let mut buf = [0u8; 64];
                while unsafe { libc::read(self.wake_read, buf.as_mut_ptr() as *mut _, 64) } > 0 {}
                continue;
            }

            let token = ev.ident as usize;
            let failed = ev.flags & (EV_EOF | EV_ERROR) != 0;

            let readable = ev.filter == EVFILT_READ;
            let writable = ev.filter == EVFILT_WRITE || (failed && ev.filter != EVFILT_READ);

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                });
            }
        }

        Ok(())
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read);
            libc::close(self.kq);
        }
    }
}
