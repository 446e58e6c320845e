//! Connected local sockets and deadline-bounded transfers

use std::mem;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::deadline::{Clock, Deadline, SystemClock};
use crate::error::{check_fd, Error, Result};
use crate::fd::OwnedDescriptor;

use super::peer::{self, PeerCredential};

/// Fill `buf` from `fd`, stopping early on end of stream.
///
/// The deadline is checked before every `read()`; once it has passed the
/// call returns `Error::Timeout` without touching the descriptor again.
/// A `read()` returning 0 ends the loop successfully with fewer bytes.
pub fn read_fd<C: Clock + ?Sized>(
    fd: RawFd,
    buf: &mut [u8],
    deadline: Deadline,
    clock: &C,
) -> Result<usize> {
    let fd = check_fd(fd)?;
    let mut total = 0;
    while total < buf.len() {
        if deadline.has_passed(clock) {
            return Err(Error::Timeout { transferred: total });
        }
        let remaining = &mut buf[total..];
        let n = unsafe {
            libc::read(
                fd,
                remaining.as_mut_ptr() as *mut libc::c_void,
                remaining.len(),
            )
        };
        if n < 0 {
            return Err(Error::last("read"));
        }
        if n == 0 {
            break;
        }
        total += n as usize;
    }
    Ok(total)
}

/// Send all of `buf` on `fd` without raising SIGPIPE.
///
/// Same deadline rules as [`read_fd`].
pub fn send_fd<C: Clock + ?Sized>(
    fd: RawFd,
    buf: &[u8],
    deadline: Deadline,
    clock: &C,
) -> Result<usize> {
    let fd = check_fd(fd)?;
    let mut total = 0;
    while total < buf.len() {
        if deadline.has_passed(clock) {
            return Err(Error::Timeout { transferred: total });
        }
        let remaining = &buf[total..];
        let n = unsafe {
            libc::send(
                fd,
                remaining.as_ptr() as *const libc::c_void,
                remaining.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            return Err(Error::last("send"));
        }
        total += n as usize;
    }
    Ok(total)
}

/// Set `SO_RCVTIMEO`, bounding each blocking receive; 0 disables it
pub fn set_read_timeout(fd: RawFd, millis: u32) -> Result<()> {
    set_timeout(fd, libc::SO_RCVTIMEO, millis, "setsockopt(SO_RCVTIMEO)")
}

/// Set `SO_SNDTIMEO`, bounding each blocking send; 0 disables it
pub fn set_send_timeout(fd: RawFd, millis: u32) -> Result<()> {
    set_timeout(fd, libc::SO_SNDTIMEO, millis, "setsockopt(SO_SNDTIMEO)")
}

fn set_timeout(fd: RawFd, option: libc::c_int, millis: u32, op: &'static str) -> Result<()> {
    let fd = check_fd(fd)?;
    let tv = libc::timeval {
        tv_sec: (millis / 1000) as libc::time_t,
        tv_usec: ((millis % 1000) * 1000) as libc::suseconds_t,
    };
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &tv as *const libc::timeval as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(Error::last(op));
    }
    Ok(())
}

/// Bytes queued for reading, without consuming them
pub fn available(fd: RawFd) -> Result<usize> {
    let fd = check_fd(fd)?;
    let mut count: libc::c_int = 0;
    let result = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut count) };
    if result == -1 {
        return Err(Error::last("ioctl(FIONREAD)"));
    }
    Ok(count.max(0) as usize)
}

/// An accepted (or otherwise connected) local socket
#[derive(Debug)]
pub struct ClientConnection {
    fd: OwnedDescriptor,
}

impl ClientConnection {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            fd: OwnedDescriptor::new(fd),
        }
    }

    /// Raw descriptor, -1 once closed
    pub fn fd(&self) -> RawFd {
        self.fd.raw().unwrap_or(-1)
    }

    /// Read until `buf` is full, the peer closes, or `deadline` passes
    pub fn read(&self, buf: &mut [u8], deadline: Deadline) -> Result<usize> {
        self.read_with_clock(buf, deadline, &SystemClock)
    }

    pub fn read_with_clock<C: Clock + ?Sized>(
        &self,
        buf: &mut [u8],
        deadline: Deadline,
        clock: &C,
    ) -> Result<usize> {
        read_fd(self.fd.raw()?, buf, deadline, clock)
    }

    /// Send all of `buf` before `deadline`
    pub fn send(&self, buf: &[u8], deadline: Deadline) -> Result<usize> {
        self.send_with_clock(buf, deadline, &SystemClock)
    }

    pub fn send_with_clock<C: Clock + ?Sized>(
        &self,
        buf: &[u8],
        deadline: Deadline,
        clock: &C,
    ) -> Result<usize> {
        send_fd(self.fd.raw()?, buf, deadline, clock)
    }

    /// Read with a deadline `timeout` from now
    pub fn read_for(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.read(buf, Deadline::after(timeout, &SystemClock))
    }

    /// Send with a deadline `timeout` from now
    pub fn send_for(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        self.send(buf, Deadline::after(timeout, &SystemClock))
    }

    pub fn set_read_timeout(&self, millis: u32) -> Result<()> {
        set_read_timeout(self.fd.raw()?, millis)
    }

    pub fn set_send_timeout(&self, millis: u32) -> Result<()> {
        set_send_timeout(self.fd.raw()?, millis)
    }

    pub fn available(&self) -> Result<usize> {
        available(self.fd.raw()?)
    }

    /// Kernel-verified identity of the other end
    pub fn peer_credential(&self) -> Result<PeerCredential> {
        peer::resolve(self.fd.raw()?)
    }

    /// Release the descriptor; later calls do nothing
    pub fn close(&mut self) -> Result<()> {
        self.fd.close()
    }

    /// Give up ownership of the raw descriptor
    pub fn into_raw(self) -> RawFd {
        self.fd.into_raw()
    }
}

impl From<OwnedFd> for ClientConnection {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl From<UnixStream> for ClientConnection {
    fn from(stream: UnixStream) -> Self {
        Self::new(OwnedFd::from(stream))
    }
}

impl AsRawFd for ClientConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}
