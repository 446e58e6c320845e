//! PTY (Pseudoterminal) sessions for Linux
//!
//! Allocates a pseudoterminal, forks a child that execs a program with the
//! slave as its standard streams, and exposes resize/wait/close on the
//! master side.
//!
//! # References
//!
//! - posix_openpt(3): https://man7.org/linux/man-pages/man3/posix_openpt.3.html
//! - tty_ioctl(4): https://man7.org/linux/man-pages/man4/tty_ioctl.4.html

mod child;
pub mod geometry;
pub mod sanitize;
pub mod session;

pub use geometry::TerminalGeometry;
pub use sanitize::{close_inherited_descriptors, DescriptorSet, STANDARD_STREAMS};
pub use session::{
    close_fd, resize, spawn, wait, ExitStatus, PtyHandle, SessionBuilder, SessionCommand,
};
