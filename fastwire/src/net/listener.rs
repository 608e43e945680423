use super::transport::TcpTransport;
use crate::reactor::poller::platform::{
    RawFd, sys_accept, sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen, sys_parse_sockaddr,
    sys_set_reuseaddr, sys_socket, sys_sockname, sys_wait_readable,
};

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// A TCP listener for bootstrap code and tests.
///
/// The accept loop of a real server lives outside the engine; this type
/// only hands accepted sockets over as [`TcpTransport`]s ready to be
/// attached to a [`SocketHandler`](super::SocketHandler).
#[derive(Debug)]
pub struct TcpListener {
    /// File descriptor of the listening socket.
    fd: RawFd,
}

impl TcpListener {
    /// Binds a TCP listener to the given address.
    ///
    /// The address must be a valid socket address string, such as
    /// `"127.0.0.1:8080"` or `"[::1]:8080"`.
    ///
    /// This function:
    /// - creates a non-blocking socket,
    /// - enables `SO_REUSEADDR`,
    /// - configures IPv6 dual-stack if applicable,
    /// - binds and starts listening.
    pub fn bind(address: &str) -> io::Result<Self> {
        let (storage, len) = sys_parse_sockaddr(address)?;
        let domain = storage.ss_family as i32;

        let listener = Self {
            fd: sys_socket(domain)?,
        };

        sys_set_reuseaddr(listener.fd)?;
        sys_ipv6_is_necessary(listener.fd, domain)?;
        sys_bind(listener.fd, &storage, len)?;
        sys_listen(listener.fd)?;

        Ok(listener)
    }

    /// Accepts a pending connection without waiting.
    ///
    /// Returns `ErrorKind::WouldBlock` when no client is queued.
    pub fn try_accept(&self) -> io::Result<(TcpTransport, SocketAddr)> {
        let (fd, address) = sys_accept(self.fd)?;

        Ok((TcpTransport::from_raw_fd(fd)?, address))
    }

    /// Parks the calling thread until a client connects.
    pub fn accept(&self) -> io::Result<(TcpTransport, SocketAddr)> {
        loop {
            sys_wait_readable(self.fd, None)?;

            match self.try_accept() {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                result => return result,
            }
        }
    }

    /// Like [`accept`](Self::accept), giving up with `ErrorKind::TimedOut`.
    pub fn accept_timeout(&self, timeout: Duration) -> io::Result<(TcpTransport, SocketAddr)> {
        if !sys_wait_readable(self.fd, Some(timeout))? {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "accept timed out"));
        }

        self.try_accept()
    }

    /// Returns the local socket address of this listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.fd)
    }
}

impl Drop for TcpListener {
    /// Closes the listening socket.
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Transport;

    #[test]
    fn test_try_accept_would_block_without_clients() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();

        let err = listener.try_accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_accept_returns_connected_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::net::TcpStream::connect(addr).unwrap();
        let (transport, peer) = listener.accept().unwrap();

        assert_eq!(peer, client.local_addr().unwrap());
        assert_eq!(transport.remote_hostname().as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_accept_timeout_expires() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();

        let err = listener
            .accept_timeout(Duration::from_millis(20))
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
