use crate::reactor::poller::platform::{
    RawFd, sockaddr_storage_to_socketaddr, sys_close, sys_connect, sys_ipv6_is_necessary,
    sys_parse_sockaddr, sys_peername, sys_read, sys_send, sys_set_nonblocking, sys_set_nosigpipe,
    sys_shutdown, sys_socket, sys_sockname,
};

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::IntoRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The byte transport beneath a connection.
///
/// Reads and writes are non-blocking: a drained or full descriptor
/// reports `ErrorKind::WouldBlock`. `read` returning `Ok(0)` means the
/// peer closed its side. An encrypted stream plugs in here and stays
/// opaque to the rest of the engine.
pub trait Transport: Send + Sync {
    fn read(&self, buffer: &mut [u8]) -> io::Result<usize>;

    fn write(&self, buffer: &[u8]) -> io::Result<usize>;

    /// Closes the descriptor. Calling it again is a no-op.
    fn close(&self);

    /// Descriptor watched by the reactor.
    fn fd(&self) -> RawFd;

    /// Name of the remote peer, when known.
    fn remote_hostname(&self) -> Option<String>;
}

/// A non-blocking TCP socket.
///
/// Owns its descriptor and closes it on [`close`](Transport::close) or
/// drop, whichever comes first.
#[derive(Debug)]
pub struct TcpTransport {
    fd: RawFd,
    closed: AtomicBool,
}

impl TcpTransport {
    /// Takes ownership of a connected socket and makes it non-blocking.
    pub fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        let transport = Self {
            fd,
            closed: AtomicBool::new(false),
        };

        sys_set_nonblocking(fd)?;
        sys_set_nosigpipe(fd)?;

        Ok(transport)
    }

    /// Takes ownership of a connected standard library stream.
    pub fn from_std(stream: std::net::TcpStream) -> io::Result<Self> {
        Self::from_raw_fd(stream.into_raw_fd())
    }

    /// Connects to `address`, waiting at most `timeout` for the handshake.
    ///
    /// The address must be a string accepted by `SocketAddr::from_str`,
    /// e.g. `"127.0.0.1:9000"` or `"[::1]:9000"`. This parks the calling
    /// thread and must not run on the reactor thread.
    pub fn connect(address: &str, timeout: Duration) -> io::Result<Self> {
        let (storage, _) = sys_parse_sockaddr(address)?;
        let addr = sockaddr_storage_to_socketaddr(&storage)?;

        let domain = storage.ss_family as i32;
        let fd = sys_socket(domain)?;

        let transport = Self {
            fd,
            closed: AtomicBool::new(false),
        };

        sys_ipv6_is_necessary(fd, domain)?;
        sys_set_nosigpipe(fd)?;
        sys_connect(fd, &addr, timeout)?;

        Ok(transport)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sys_peername(self.fd)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.fd)
    }

    /// Shuts down the read, write, or both halves of this connection.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        sys_shutdown(self.fd, how)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for TcpTransport {
    fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        sys_read(self.fd, buffer)
    }

    fn write(&self, buffer: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        sys_send(self.fd, buffer)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            sys_close(self.fd);
        }
    }

    fn fd(&self) -> RawFd {
        self.fd
    }

    fn remote_hostname(&self) -> Option<String> {
        self.peer_addr().ok().map(|addr| addr.ip().to_string())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
