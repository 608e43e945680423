use libc::{
    AF_INET, AF_INET6, EINPROGRESS, F_GETFL, F_SETFL, IPPROTO_IPV6, IPV6_V6ONLY, O_NONBLOCK,
    POLLIN, POLLOUT, SHUT_RD, SHUT_RDWR, SHUT_WR, SO_ERROR, SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET,
    accept, bind, c_int, close, connect, fcntl, getpeername, getsockname, getsockopt, listen,
    poll, pollfd, read, setsockopt, shutdown, sockaddr, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socket, socklen_t,
};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;
use std::time::Duration;
use std::{io, mem};

pub(crate) use std::os::fd::RawFd;

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read. `Ok(0)` means the peer closed its
/// write half. A drained non-blocking descriptor surfaces as
/// `ErrorKind::WouldBlock`.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Sends the buffer on a connected socket.
///
/// A peer that went away yields `EPIPE` instead of raising `SIGPIPE`
/// in the process.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    #[cfg(target_os = "linux")]
    let flags = libc::MSG_NOSIGNAL;
    #[cfg(not(target_os = "linux"))]
    let flags = 0;

    let n = unsafe { libc::send(fd, buffer.as_ptr() as *const _, buffer.len(), flags) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Sets a file descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking stream socket.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(fd) {
        unsafe { close(fd) };
        return Err(e);
    }

    Ok(fd)
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> io::Result<()> {
    let rc = unsafe { bind(fd, addr as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { listen(fd, 128) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts a new incoming connection.
///
/// The returned client socket is automatically set to non-blocking mode.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client_fd = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if client_fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(client_fd) {
        unsafe { close(client_fd) };
        return Err(e);
    }

    let addr = sockaddr_storage_to_socketaddr(&storage)?;

    Ok((client_fd, addr))
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

/// Returns the address of the connected peer.
pub(crate) fn sys_peername(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getpeername(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

/// Connects a non-blocking socket, waiting at most `timeout` for the
/// handshake to finish.
///
/// This parks the calling thread. It is meant for bootstrap code and
/// worker threads, never for the reactor thread.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr, timeout: Duration) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(EINPROGRESS) && err.kind() != io::ErrorKind::WouldBlock {
        return Err(err);
    }

    let mut pfd = pollfd {
        fd,
        events: POLLOUT,
        revents: 0,
    };

    let timeout_ms = timeout.as_millis().min(c_int::MAX as u128) as c_int;

    loop {
        let n = unsafe { poll(&mut pfd, 1, timeout_ms) };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
        }

        return sys_get_socket_error(fd);
    }
}

/// Parks the calling thread until `fd` is readable or `timeout` elapses.
///
/// Returns `false` on timeout. `None` waits indefinitely.
pub(crate) fn sys_wait_readable(fd: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
    let mut pfd = pollfd {
        fd,
        events: POLLIN,
        revents: 0,
    };

    let timeout_ms = match timeout {
        Some(t) => t.as_millis().min(c_int::MAX as u128) as c_int,
        None => -1,
    };

    loop {
        let n = unsafe { poll(&mut pfd, 1, timeout_ms) };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        return Ok(n > 0);
    }
}

/// Reads and clears the pending `SO_ERROR` of a socket.
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<()> {
    let mut value: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    let rc = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut value as *mut _ as *mut _,
            &mut len,
        )
    };

    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    if value != 0 {
        return Err(io::Error::from_raw_os_error(value));
    }

    Ok(())
}

/// Shuts down a socket.
pub(crate) fn sys_shutdown(fd: RawFd, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => SHUT_RD,
        Shutdown::Write => SHUT_WR,
        Shutdown::Both => SHUT_RDWR,
    };

    let rc = unsafe { shutdown(fd, how) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Stops writes to a reset socket from raising `SIGPIPE`.
///
/// Linux passes `MSG_NOSIGNAL` per call in [`sys_send`] instead.
#[cfg(not(target_os = "linux"))]
pub(crate) fn sys_set_nosigpipe(fd: RawFd) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub(crate) fn sys_set_nosigpipe(_fd: RawFd) -> io::Result<()> {
    Ok(())
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Parses a socket address string into a `sockaddr_storage`.
pub(crate) fn sys_parse_sockaddr(address: &str) -> io::Result<(sockaddr_storage, socklen_t)> {
    let addr = SocketAddr::from_str(address)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket addr"))?;

    Ok(socketaddr_to_storage(&addr))
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

/// Enables IPv6 dual-stack support when required.
pub(crate) fn sys_ipv6_is_necessary(fd: RawFd, domain: c_int) -> io::Result<()> {
    if domain == AF_INET6 {
        let value: c_int = 0;

        let rc = unsafe {
            setsockopt(
                fd,
                IPPROTO_IPV6,
                IPV6_V6ONLY,
                &value as *const _ as *const _,
                mem::size_of::<c_int>() as socklen_t,
            )
        };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
