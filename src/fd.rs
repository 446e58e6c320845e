//! Owned descriptor with a single explicit release

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::error::{Error, Result};

/// A file descriptor owned by exactly one holder.
///
/// `close()` releases it once; later calls are no-ops, so a released number
/// that the kernel has since reused is never closed by mistake. Dropping an
/// open descriptor closes it.
#[derive(Debug)]
pub struct OwnedDescriptor {
    fd: Option<OwnedFd>,
}

impl OwnedDescriptor {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    /// Take ownership of a raw descriptor number.
    ///
    /// # Safety
    ///
    /// `fd` must be open and not owned by anything else.
    pub unsafe fn from_raw(fd: RawFd) -> Result<Self> {
        if fd < 0 {
            return Err(Error::InvalidDescriptor(fd));
        }
        Ok(Self::new(OwnedFd::from_raw_fd(fd)))
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Raw number, or `InvalidDescriptor(-1)` once released
    pub fn raw(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or(Error::InvalidDescriptor(-1))
    }

    pub fn borrow(&self) -> Result<BorrowedFd<'_>> {
        self.fd
            .as_ref()
            .map(|fd| fd.as_fd())
            .ok_or(Error::InvalidDescriptor(-1))
    }

    /// Release the descriptor, reporting the kernel's verdict the first time
    pub fn close(&mut self) -> Result<()> {
        match self.fd.take() {
            Some(fd) => nix::unistd::close(fd.into_raw_fd()).map_err(Error::sys("close")),
            None => Ok(()),
        }
    }

    /// Give up ownership; -1 if already released
    pub fn into_raw(mut self) -> RawFd {
        self.fd.take().map(IntoRawFd::into_raw_fd).unwrap_or(-1)
    }
}

impl From<OwnedFd> for OwnedDescriptor {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}
