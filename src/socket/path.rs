//! Unix-domain socket addresses
//!
//! `sun_path` is 108 bytes on Linux (UNIX_PATH_MAX). Paths are validated
//! against that capacity up front instead of being silently truncated by the
//! kernel.

use std::ffi::OsStr;
use std::fmt;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{Error, Result};

/// Size of `sockaddr_un.sun_path`
pub const SUN_PATH_CAPACITY: usize = 108;

/// Longest accepted path, leaving room for the terminating NUL
pub const MAX_PATH_LEN: usize = SUN_PATH_CAPACITY - 1;

/// A validated socket address: filesystem path or abstract name
#[derive(Clone, PartialEq, Eq)]
pub struct SocketPath {
    bytes: [u8; SUN_PATH_CAPACITY],
    len: usize,
    padded: bool,
}

impl SocketPath {
    /// Validate raw address bytes.
    ///
    /// A leading NUL selects the abstract namespace; otherwise the bytes are a
    /// filesystem path and may not contain NUL.
    pub fn new(path: &[u8]) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::PathEmpty);
        }
        if path.len() > MAX_PATH_LEN {
            return Err(Error::PathTooLong {
                len: path.len(),
                max: MAX_PATH_LEN,
            });
        }
        if path[0] != 0 {
            if let Some(offset) = path.iter().position(|&b| b == 0) {
                return Err(Error::PathContainsNul(offset));
            }
        }

        let mut bytes = [0u8; SUN_PATH_CAPACITY];
        bytes[..path.len()].copy_from_slice(path);
        Ok(Self {
            bytes,
            len: path.len(),
            padded: false,
        })
    }

    /// Filesystem socket at `path`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(path.as_ref().as_os_str().as_bytes())
    }

    /// Abstract-namespace socket called `name`.
    ///
    /// The address is length-delimited: the kernel name is the leading NUL
    /// plus `name`, the convention of `ss -x`, systemd and Rust's std. Peers
    /// that always pass the full `sizeof(sockaddr_un)` see a different name
    /// (`name` followed by zero bytes) and cannot reach it; use
    /// [`SocketPath::padded_abstract_name`] to interoperate with those.
    pub fn abstract_name(name: &[u8]) -> Result<Self> {
        let mut raw = Vec::with_capacity(name.len() + 1);
        raw.push(0);
        raw.extend_from_slice(name);
        Self::new(&raw)
    }

    /// Abstract-namespace socket called `name`, zero-padded to fill all of
    /// `sun_path`
    pub fn padded_abstract_name(name: &[u8]) -> Result<Self> {
        let mut path = Self::abstract_name(name)?;
        path.padded = true;
        Ok(path)
    }

    /// The serialized address bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_abstract(&self) -> bool {
        self.bytes[0] == 0
    }

    /// Whether the kernel address spans the whole of `sun_path`
    pub fn is_padded(&self) -> bool {
        self.padded
    }

    /// The filesystem path, `None` for abstract names
    pub fn to_path(&self) -> Option<&Path> {
        if self.is_abstract() {
            None
        } else {
            Some(Path::new(OsStr::from_bytes(self.as_bytes())))
        }
    }

    /// Build the kernel address and its length
    pub(crate) fn to_sockaddr(&self) -> (libc::sockaddr_un, libc::socklen_t) {
        let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, src) in addr.sun_path.iter_mut().zip(self.as_bytes()) {
            *dst = *src as libc::c_char;
        }
        if self.padded {
            return (addr, mem::size_of::<libc::sockaddr_un>() as libc::socklen_t);
        }
        // Abstract names are length-delimited; filesystem paths carry their NUL.
        let terminator = if self.is_abstract() { 0 } else { 1 };
        let len = mem::size_of::<libc::sa_family_t>() + self.len + terminator;
        (addr, len as libc::socklen_t)
    }
}

impl fmt::Display for SocketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_abstract() {
            write!(f, "@{}", String::from_utf8_lossy(&self.as_bytes()[1..]))
        } else {
            write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
        }
    }
}

impl fmt::Debug for SocketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.padded {
            write!(f, "SocketPath({:?}, padded)", self.to_string())
        } else {
            write!(f, "SocketPath({:?})", self.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_path_rejected() {
        assert!(matches!(SocketPath::new(b""), Err(Error::PathEmpty)));
    }

    #[test]
    fn test_length_boundary() {
        let ok = vec![b'a'; MAX_PATH_LEN];
        assert_eq!(SocketPath::new(&ok).unwrap().len(), 107);

        let too_long = vec![b'a'; SUN_PATH_CAPACITY];
        assert!(matches!(
            SocketPath::new(&too_long),
            Err(Error::PathTooLong { len: 108, max: 107 })
        ));
    }

    #[test]
    fn test_interior_nul_rejected_for_filesystem_paths() {
        assert!(matches!(
            SocketPath::new(b"/tmp/a\0b"),
            Err(Error::PathContainsNul(6))
        ));
    }

    #[test]
    fn test_abstract_name() {
        let path = SocketPath::abstract_name(b"ptyhost").unwrap();
        assert!(path.is_abstract());
        assert_eq!(path.as_bytes(), b"\0ptyhost");
        assert_eq!(path.to_path(), None);
        assert_eq!(path.to_string(), "@ptyhost");
    }

    #[test]
    fn test_sockaddr_length() {
        let path = SocketPath::from_path("/tmp/s").unwrap();
        let (addr, len) = path.to_sockaddr();
        assert_eq!(addr.sun_family, libc::AF_UNIX as libc::sa_family_t);
        assert_eq!(len as usize, 2 + 6 + 1);
        assert_eq!(addr.sun_path[5] as u8, b's');
        assert_eq!(addr.sun_path[6], 0);

        let (_, abstract_len) = SocketPath::abstract_name(b"x").unwrap().to_sockaddr();
        assert_eq!(abstract_len as usize, 2 + 2);
    }

    #[test]
    fn test_padded_abstract_name_fills_sun_path() {
        let plain = SocketPath::abstract_name(b"ptyhost").unwrap();
        let padded = SocketPath::padded_abstract_name(b"ptyhost").unwrap();
        assert!(padded.is_abstract() && padded.is_padded());
        assert!(!plain.is_padded());
        assert_eq!(padded.as_bytes(), plain.as_bytes());
        assert_ne!(padded, plain);

        let (addr, len) = padded.to_sockaddr();
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_un>());
        assert_eq!(addr.sun_path[1] as u8, b'p');
        assert!(addr.sun_path[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_padded_name_too_long() {
        let name = vec![b'a'; MAX_PATH_LEN];
        assert!(matches!(
            SocketPath::padded_abstract_name(&name),
            Err(Error::PathTooLong { len: 108, max: 107 })
        ));
    }

    proptest! {
        #[test]
        fn filesystem_paths_validate_by_length(tail in proptest::collection::vec(1u8..=255, 0..200)) {
            let mut raw = vec![b'/'];
            raw.extend(tail);
            match SocketPath::new(&raw) {
                Ok(path) => {
                    prop_assert!(raw.len() <= MAX_PATH_LEN);
                    prop_assert_eq!(path.as_bytes(), &raw[..]);
                }
                Err(Error::PathTooLong { len, .. }) => {
                    prop_assert!(raw.len() > MAX_PATH_LEN);
                    prop_assert_eq!(len, raw.len());
                }
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }
    }
}
