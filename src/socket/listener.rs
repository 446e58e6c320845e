//! Listening Unix-domain sockets

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use tracing::{debug, info};

use crate::error::{check_fd, Error, Result};
use crate::fd::OwnedDescriptor;

use super::path::SocketPath;
use super::stream::ClientConnection;

/// Smallest accepted listen backlog
pub const MIN_BACKLOG: i32 = 1;

/// Largest accepted listen backlog
pub const MAX_BACKLOG: i32 = 500;

/// Backlog used when the caller has no preference
pub const DEFAULT_BACKLOG: i32 = 50;

/// Create, bind and listen on a stream socket at `path`.
///
/// Validation happens before any kernel call. If `bind` or `listen` fails
/// the half-built socket is closed before the error is returned.
pub fn create_server(path: &SocketPath, backlog: i32) -> Result<OwnedFd> {
    if !(MIN_BACKLOG..=MAX_BACKLOG).contains(&backlog) {
        return Err(Error::InvalidBacklog(backlog));
    }

    let raw = unsafe {
        libc::socket(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if raw < 0 {
        return Err(Error::last("socket"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let (addr, len) = path.to_sockaddr();
    let result = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            len,
        )
    };
    if result != 0 {
        return Err(Error::last("bind"));
    }

    if unsafe { libc::listen(fd.as_raw_fd(), backlog) } != 0 {
        return Err(Error::last("listen"));
    }

    debug!(fd = fd.as_raw_fd(), %path, backlog, "listening");
    Ok(fd)
}

/// Accept one pending connection on `fd`, blocking until one arrives.
///
/// The peer address is not requested.
pub fn accept(fd: RawFd) -> Result<OwnedFd> {
    let fd = check_fd(fd)?;
    let client = unsafe { libc::accept4(fd, ptr::null_mut(), ptr::null_mut(), libc::SOCK_CLOEXEC) };
    if client < 0 {
        return Err(Error::last("accept"));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(client) })
}

/// A bound, listening socket and the address it serves
#[derive(Debug)]
pub struct ListenSocket {
    fd: OwnedDescriptor,
    path: SocketPath,
}

impl ListenSocket {
    pub fn bind(path: SocketPath, backlog: i32) -> Result<Self> {
        let fd = create_server(&path, backlog)?;
        info!(fd = fd.as_raw_fd(), %path, "server socket created");
        Ok(Self {
            fd: OwnedDescriptor::new(fd),
            path,
        })
    }

    pub fn path(&self) -> &SocketPath {
        &self.path
    }

    /// Raw descriptor, -1 once closed
    pub fn fd(&self) -> RawFd {
        self.fd.raw().unwrap_or(-1)
    }

    pub fn accept(&self) -> Result<ClientConnection> {
        accept(self.fd.raw()?).map(ClientConnection::new)
    }

    /// Wake any thread blocked in `accept` without releasing the descriptor
    pub fn shutdown(&self) -> Result<()> {
        let fd = self.fd.raw()?;
        if unsafe { libc::shutdown(fd, libc::SHUT_RDWR) } != 0 {
            return Err(Error::last("shutdown"));
        }
        Ok(())
    }

    /// Release the descriptor. The socket file, if any, stays on disk.
    pub fn close(&mut self) -> Result<()> {
        self.fd.close()
    }
}

impl AsRawFd for ListenSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}
