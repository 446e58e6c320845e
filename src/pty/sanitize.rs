//! Descriptor sanitization before exec
//!
//! A forked child inherits every open file of the parent: listening sockets,
//! other PTY masters, pipes. Descriptors opened by this crate are
//! close-on-exec, but the host process may hold others that are not, so the
//! child closes everything outside an allow-list before running a new image.

use std::ffi::CStr;
use std::os::fd::{AsRawFd, RawFd};

use nix::dir::Dir;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

/// stdin, stdout and stderr
pub const STANDARD_STREAMS: [RawFd; 3] = [
    libc::STDIN_FILENO,
    libc::STDOUT_FILENO,
    libc::STDERR_FILENO,
];

const FD_DIR: &str = "/proc/self/fd";

/// View over the calling process's descriptor table
pub struct DescriptorSet {
    dir: Dir,
}

impl DescriptorSet {
    /// Open the descriptor table, `None` when `/proc` is unavailable
    pub fn open() -> Option<Self> {
        Dir::open(
            FD_DIR,
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .ok()
        .map(|dir| Self { dir })
    }

    /// Visit every open descriptor except the one backing this view
    fn for_each(&mut self, mut f: impl FnMut(RawFd)) {
        let own = self.dir.as_raw_fd();
        for entry in self.dir.iter().flatten() {
            match parse_descriptor(entry.file_name()) {
                Some(fd) if fd != own => f(fd),
                _ => {}
            }
        }
    }

    /// Snapshot of open descriptor numbers, ascending
    pub fn open_descriptors() -> Vec<RawFd> {
        let mut fds = Vec::new();
        if let Some(mut set) = Self::open() {
            set.for_each(|fd| fds.push(fd));
        }
        fds.sort_unstable();
        fds
    }

    /// Close every descriptor not in `keep`
    pub fn close_all_except(&mut self, keep: &[RawFd]) {
        self.for_each(|fd| {
            if !keep.contains(&fd) {
                let _ = nix::unistd::close(fd);
            }
        });
    }
}

/// Close every inherited descriptor outside `keep`.
///
/// Degrades to a no-op when the descriptor table cannot be enumerated.
pub fn close_inherited_descriptors(keep: &[RawFd]) {
    if let Some(mut set) = DescriptorSet::open() {
        set.close_all_except(keep);
    }
}

fn parse_descriptor(name: &CStr) -> Option<RawFd> {
    name.to_str().ok()?.parse::<RawFd>().ok()
}
