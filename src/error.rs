//! Error types for PTY and local socket operations

use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Error type shared by every ptyhost operation
#[derive(Error, Debug)]
pub enum Error {
    /// Socket path has no bytes
    #[error("Socket path is empty")]
    PathEmpty,

    /// Socket path does not fit in `sun_path`
    #[error("Socket path is {len} bytes, the limit is {max} bytes")]
    PathTooLong { len: usize, max: usize },

    /// Filesystem socket path contains an interior NUL byte
    #[error("Socket path contains a NUL byte at offset {0}")]
    PathContainsNul(usize),

    /// Filesystem socket path is relative
    #[error("Socket path {0:?} is not an absolute path")]
    PathNotAbsolute(PathBuf),

    /// Something other than a socket already exists at the path
    #[error("Socket path {0:?} is occupied by a non-socket file")]
    PathOccupied(PathBuf),

    /// Listen backlog outside of the accepted range
    #[error("Backlog {0} is outside of 1..=500")]
    InvalidBacklog(i32),

    /// Negative or already released descriptor
    #[error("Invalid file descriptor {0}")]
    InvalidDescriptor(RawFd),

    /// Pid that would make waitpid() reap some other child
    #[error("Invalid process id {0}")]
    InvalidPid(i32),

    /// Command cannot be executed as given
    #[error("Invalid command {command:?}: {reason}")]
    InvalidCommand {
        command: String,
        reason: &'static str,
    },

    /// One of open/grant/unlock/ptsname/line discipline failed
    #[error("Failed to allocate PTY ({stage}): {source}")]
    PtyAllocation {
        stage: &'static str,
        #[source]
        source: Errno,
    },

    /// fork() failed, usually resource exhaustion
    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),

    /// A kernel call failed
    #[error("{op} failed: {source}")]
    Sys {
        op: &'static str,
        #[source]
        source: Errno,
    },

    /// The deadline elapsed before the transfer completed
    #[error("Deadline elapsed after {transferred} bytes")]
    Timeout { transferred: usize },

    /// waitpid() reported a state other than exit or signal termination
    #[error("Unexpected wait status: {0}")]
    UnexpectedWaitStatus(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build a `Sys` error from the current `errno`
    pub(crate) fn last(op: &'static str) -> Self {
        Error::Sys {
            op,
            source: Errno::last(),
        }
    }

    /// Adapter for `map_err` on nix results
    pub(crate) fn sys(op: &'static str) -> impl FnOnce(Errno) -> Self {
        move |source| Error::Sys { op, source }
    }

    /// The OS error code, when the failure came from a kernel call
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::PtyAllocation { source, .. } | Error::Sys { source, .. } => Some(*source as i32),
            Error::Fork(source) => Some(*source as i32),
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Whether this is the deadline outcome rather than a hard failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Whether the input was rejected before any kernel call
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::PathEmpty
                | Error::PathTooLong { .. }
                | Error::PathContainsNul(_)
                | Error::PathNotAbsolute(_)
                | Error::InvalidBacklog(_)
                | Error::InvalidDescriptor(_)
                | Error::InvalidPid(_)
                | Error::InvalidCommand { .. }
        )
    }
}

/// Result type for ptyhost operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reject negative descriptors before handing them to the kernel
pub(crate) fn check_fd(fd: RawFd) -> Result<RawFd> {
    if fd < 0 {
        Err(Error::InvalidDescriptor(fd))
    } else {
        Ok(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_from_sys() {
        let err = Error::Sys {
            op: "bind",
            source: Errno::EADDRINUSE,
        };
        assert_eq!(err.errno(), Some(libc::EADDRINUSE));
        assert_eq!(err.to_string(), format!("bind failed: {}", Errno::EADDRINUSE));
    }

    #[test]
    fn test_validation_errors_carry_no_errno() {
        assert_eq!(Error::InvalidBacklog(0).errno(), None);
        assert!(Error::InvalidBacklog(0).is_validation());
        assert!(!Error::Timeout { transferred: 0 }.is_validation());
    }

    #[test]
    fn test_timeout_is_distinct() {
        assert!(Error::Timeout { transferred: 3 }.is_timeout());
        assert!(!Error::last("read").is_timeout());
    }

    #[test]
    fn test_check_fd() {
        assert!(matches!(check_fd(-1), Err(Error::InvalidDescriptor(-1))));
        assert_eq!(check_fd(0).unwrap(), 0);
    }
}
