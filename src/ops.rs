//! Flat call surface over raw descriptors
//!
//! Every operation returns a [`CallResult`]: `retval` 0 on success, -1 on
//! failure and -2 when a deadline elapsed, plus the OS error code and a
//! message. Descriptors are plain numbers here; ownership is the caller's.

use std::os::fd::{IntoRawFd, RawFd};
use std::sync::OnceLock;

use nix::unistd::Pid;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::deadline::{Deadline, SystemClock};
use crate::error::{Error, Result};
use crate::pty::{self, SessionBuilder, SessionCommand, TerminalGeometry};
use crate::socket::{self, PeerCredential, SocketPath};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Install the configuration used by [`spawn_pty`].
///
/// Only the first call wins; returns `false` if a configuration was already
/// in place.
pub fn install_config(config: Config) -> bool {
    CONFIG.set(config).is_ok()
}

fn config() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}

/// Outcome of a flat call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallResult<T> {
    /// 0 ok, -1 error, -2 timeout
    pub retval: i32,
    pub data: T,
    pub errno: Option<i32>,
    pub error: Option<String>,
}

pub const RETVAL_OK: i32 = 0;
pub const RETVAL_ERROR: i32 = -1;
pub const RETVAL_TIMEOUT: i32 = -2;

impl<T> CallResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            retval: RETVAL_OK,
            data,
            errno: None,
            error: None,
        }
    }

    /// Failure carrying `data` accumulated before the error
    pub fn failed(error: &Error, data: T) -> Self {
        Self {
            retval: if error.is_timeout() {
                RETVAL_TIMEOUT
            } else {
                RETVAL_ERROR
            },
            data,
            errno: error.errno(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.retval == RETVAL_OK
    }

    pub fn is_timeout(&self) -> bool {
        self.retval == RETVAL_TIMEOUT
    }
}

impl<T: Default> From<Result<T>> for CallResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                debug!(error = %e, "call failed");
                Self::failed(&e, T::default())
            }
        }
    }
}

/// Spawn the login program (or the failsafe shell) on a new PTY.
///
/// Data is `(master_fd, pid)`; the caller owns both.
pub fn spawn_pty(failsafe: bool, geometry: TerminalGeometry) -> CallResult<(RawFd, i32)> {
    let config = config();
    let command = SessionCommand::from_failsafe(failsafe);
    let result = SessionBuilder::from_config(&command, &config.session)
        .map(|builder| builder.geometry(geometry))
        .and_then(SessionBuilder::spawn);
    match result {
        Ok(handle) => {
            let (fd, pid) = handle.into_raw_parts();
            CallResult::ok((fd, pid.as_raw()))
        }
        Err(e) => CallResult::failed(&e, (-1, -1)),
    }
}

pub fn resize_pty(master_fd: RawFd, geometry: TerminalGeometry) -> CallResult<()> {
    pty::resize(master_fd, geometry).into()
}

/// Wait for `pid`; data is the exit code, or the negated signal number
pub fn wait_pid(pid: i32) -> CallResult<i32> {
    pty::wait(Pid::from_raw(pid)).map(|status| status.code()).into()
}

pub fn close_fd(fd: RawFd) -> CallResult<()> {
    pty::close_fd(fd).into()
}

/// Create a listening socket at `path`; data is the descriptor or -1
pub fn create_server_socket(path: &[u8], backlog: i32) -> CallResult<RawFd> {
    let result = SocketPath::new(path)
        .and_then(|path| socket::create_server(&path, backlog))
        .map(IntoRawFd::into_raw_fd);
    match result {
        Ok(fd) => CallResult::ok(fd),
        Err(e) => CallResult::failed(&e, -1),
    }
}

pub fn close_socket(fd: RawFd) -> CallResult<()> {
    pty::close_fd(fd).into()
}

/// Accept one client; data is the client descriptor or -1
pub fn accept_connection(fd: RawFd) -> CallResult<RawFd> {
    match socket::accept(fd) {
        Ok(client) => CallResult::ok(client.into_raw_fd()),
        Err(e) => CallResult::failed(&e, -1),
    }
}

/// Read up to `size` bytes before `deadline_ms` (0 = none).
///
/// On timeout the bytes already received are still returned.
pub fn read_socket(fd: RawFd, size: usize, deadline_ms: u64) -> CallResult<Vec<u8>> {
    let mut buf = vec![0u8; size];
    match socket::read_fd(fd, &mut buf, Deadline::at_millis(deadline_ms), &SystemClock) {
        Ok(n) => {
            buf.truncate(n);
            CallResult::ok(buf)
        }
        Err(e) => {
            let received = match e {
                Error::Timeout { transferred } => transferred,
                _ => 0,
            };
            buf.truncate(received);
            CallResult::failed(&e, buf)
        }
    }
}

/// Send all of `data` before `deadline_ms` (0 = none); data is bytes sent
pub fn send_socket(fd: RawFd, data: &[u8], deadline_ms: u64) -> CallResult<usize> {
    match socket::send_fd(fd, data, Deadline::at_millis(deadline_ms), &SystemClock) {
        Ok(n) => CallResult::ok(n),
        Err(e) => {
            let sent = match e {
                Error::Timeout { transferred } => transferred,
                _ => 0,
            };
            CallResult::failed(&e, sent)
        }
    }
}

pub fn available_bytes(fd: RawFd) -> CallResult<usize> {
    socket::available(fd).into()
}

pub fn set_read_timeout(fd: RawFd, millis: u32) -> CallResult<()> {
    socket::set_read_timeout(fd, millis).into()
}

pub fn set_send_timeout(fd: RawFd, millis: u32) -> CallResult<()> {
    socket::set_send_timeout(fd, millis).into()
}

/// Peer credential; on failure data holds the -1 sentinels
pub fn get_peer_credential(fd: RawFd) -> CallResult<PeerCredential> {
    socket::peer::resolve(fd).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_timeout_maps_to_minus_two() {
        let r: CallResult<usize> = CallResult::failed(&Error::Timeout { transferred: 2 }, 2);
        assert_eq!(r.retval, RETVAL_TIMEOUT);
        assert!(r.is_timeout());
        assert_eq!(r.errno, None);
    }

    #[test]
    fn test_validation_failure() {
        let r = create_server_socket(b"", 50);
        assert_eq!(r.retval, RETVAL_ERROR);
        assert_eq!(r.data, -1);
        assert_eq!(r.errno, None);
        assert!(r.error.unwrap().contains("empty"));

        let r = create_server_socket(b"/tmp/x", 0);
        assert_eq!(r.retval, RETVAL_ERROR);
    }

    #[test]
    fn test_kernel_failure_carries_errno() {
        let r = available_bytes(i32::MAX);
        assert_eq!(r.retval, RETVAL_ERROR);
        assert_eq!(r.errno, Some(libc::EBADF));
    }

    #[test]
    fn test_read_and_send_on_pair() {
        let (a, b) = UnixStream::pair().unwrap();
        let sent = send_socket(a.as_raw_fd(), b"abcdef", 0);
        assert!(sent.is_ok());
        assert_eq!(sent.data, 6);

        assert_eq!(available_bytes(b.as_raw_fd()).data, 6);
        drop(a);
        let read = read_socket(b.as_raw_fd(), 16, 0);
        assert!(read.is_ok());
        assert_eq!(read.data, b"abcdef");
    }

    #[test]
    fn test_past_deadline_reads_nothing() {
        let (a, b) = UnixStream::pair().unwrap();
        send_socket(a.as_raw_fd(), b"xyz", 0);
        let read = read_socket(b.as_raw_fd(), 3, 1);
        assert!(read.is_timeout());
        assert!(read.data.is_empty());
        assert_eq!(available_bytes(b.as_raw_fd()).data, 3);
    }

    #[test]
    fn test_peer_credential_failure_keeps_sentinels() {
        let r = get_peer_credential(-1);
        assert_eq!(r.retval, RETVAL_ERROR);
        assert_eq!(r.data, PeerCredential::default());
    }

    #[test]
    fn test_call_result_serializes() {
        let json = serde_json::to_string(&CallResult::ok(5usize)).unwrap();
        assert_eq!(json, r#"{"retval":0,"data":5,"errno":null,"error":null}"#);
    }
}
