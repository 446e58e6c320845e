//! Peer credentials of connected local sockets

use std::fmt;
use std::fs;
use std::mem;
use std::os::fd::RawFd;

use serde::Serialize;
use tracing::debug;

use crate::error::{check_fd, Error, Result};

/// Kernel-verified identity of a socket peer.
///
/// `pid`, `uid` and `gid` are -1 until the kernel has filled them in.
/// The process name and command line come from `/proc/<pid>/cmdline` and are
/// `None` whenever that record is unreadable or empty (other users'
/// processes, exited peers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerCredential {
    pub pid: i32,
    pub uid: i32,
    pub gid: i32,
    pub process_name: Option<String>,
    pub cmdline: Option<String>,
}

impl Default for PeerCredential {
    fn default() -> Self {
        Self {
            pid: -1,
            uid: -1,
            gid: -1,
            process_name: None,
            cmdline: None,
        }
    }
}

impl PeerCredential {
    /// `pid (name)`, or just `pid` when the name is unknown
    pub fn process_string(&self) -> String {
        match self.process_name.as_deref() {
            Some(name) if !name.is_empty() => format!("{} ({})", self.pid, name),
            _ => self.pid.to_string(),
        }
    }

    /// One-line summary for logs
    pub fn minimal_string(&self) -> String {
        format!(
            "process={}, user={}, group={}",
            self.process_string(),
            self.uid,
            self.gid
        )
    }
}

impl fmt::Display for PeerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.minimal_string())
    }
}

/// Read `SO_PEERCRED` for `fd` and enrich it from `/proc`.
///
/// Only the `getsockopt` failure is an error.
pub fn resolve(fd: RawFd) -> Result<PeerCredential> {
    let fd = check_fd(fd)?;
    let mut cred = PeerCredential::default();

    let mut raw = libc::ucred {
        pid: -1,
        uid: u32::MAX,
        gid: u32::MAX,
    };
    let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut raw as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };
    if result != 0 {
        return Err(Error::last("getsockopt(SO_PEERCRED)"));
    }
    cred.pid = raw.pid;
    cred.uid = raw.uid as i32;
    cred.gid = raw.gid as i32;

    if cred.pid > 0 {
        match fs::read(format!("/proc/{}/cmdline", cred.pid)) {
            Ok(bytes) => {
                if let Some((name, cmdline)) = parse_cmdline(&bytes) {
                    cred.process_name = Some(name);
                    cred.cmdline = Some(cmdline);
                }
            }
            Err(e) => debug!(pid = cred.pid, error = %e, "peer cmdline unavailable"),
        }
    }

    Ok(cred)
}

/// Split a raw `/proc/<pid>/cmdline` record into (name, rendered command line).
///
/// Arguments are NUL-terminated; the rendered line joins them with spaces.
pub fn parse_cmdline(raw: &[u8]) -> Option<(String, String)> {
    let raw = raw.strip_suffix(b"\0").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }

    let name_end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let name = String::from_utf8_lossy(&raw[..name_end]).into_owned();

    // Each argument becomes one space-separated field, empty ones included.
    let spaced: Vec<u8> = raw.iter().map(|&b| if b == 0 { b' ' } else { b }).collect();
    let cmdline = String::from_utf8_lossy(&spaced).into_owned();

    Some((name, cmdline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_default_is_sentinel() {
        let cred = PeerCredential::default();
        assert_eq!((cred.pid, cred.uid, cred.gid), (-1, -1, -1));
        assert_eq!(cred.process_string(), "-1");
    }

    #[test]
    fn test_parse_cmdline() {
        let (name, line) = parse_cmdline(b"/bin/sh\0-c\0echo hi\0").unwrap();
        assert_eq!(name, "/bin/sh");
        assert_eq!(line, "/bin/sh -c echo hi");
    }

    #[test]
    fn test_parse_cmdline_empty() {
        assert_eq!(parse_cmdline(b""), None);
        assert_eq!(parse_cmdline(b"\0"), None);
    }

    #[test]
    fn test_parse_cmdline_keeps_empty_arguments() {
        let (name, line) = parse_cmdline(b"\0\0x\0").unwrap();
        assert_eq!(name, "");
        assert_eq!(line, " x");

        let (_, line) = parse_cmdline(b"a\0\0b\0").unwrap();
        assert_eq!(line, "a  b");
    }

    #[test]
    fn test_parse_cmdline_without_terminator() {
        let (name, line) = parse_cmdline(b"daemon").unwrap();
        assert_eq!(name, "daemon");
        assert_eq!(line, "daemon");
    }

    #[test]
    fn test_display_helpers() {
        let cred = PeerCredential {
            pid: 42,
            uid: 1000,
            gid: 100,
            process_name: Some("sshd".into()),
            cmdline: Some("sshd -D".into()),
        };
        assert_eq!(cred.process_string(), "42 (sshd)");
        assert_eq!(cred.minimal_string(), "process=42 (sshd), user=1000, group=100");
        assert_eq!(cred.to_string(), cred.minimal_string());
    }

    #[test]
    fn test_resolve_self_pair() {
        let (a, _b) = UnixStream::pair().unwrap();
        let cred = resolve(a.as_raw_fd()).unwrap();
        assert_eq!(cred.pid, std::process::id() as i32);
        assert_eq!(cred.uid, unsafe { libc::getuid() } as i32);
        assert_eq!(cred.gid, unsafe { libc::getgid() } as i32);
        assert!(cred.process_name.is_some());
    }

    #[test]
    fn test_resolve_non_socket() {
        let file = tempfile::tempfile().unwrap();
        let err = resolve(file.as_raw_fd()).unwrap_err();
        assert_eq!(err.errno(), Some(libc::ENOTSOCK));
    }

    proptest! {
        #[test]
        fn cmdline_name_is_first_argument(
            args in proptest::collection::vec("[a-z/._-]{1,12}", 1..6)
        ) {
            let mut raw = Vec::new();
            for arg in &args {
                raw.extend_from_slice(arg.as_bytes());
                raw.push(0);
            }
            let (name, line) = parse_cmdline(&raw).unwrap();
            prop_assert_eq!(name, args[0].clone());
            prop_assert_eq!(line, args.join(" "));
        }
    }
}
