//! ptyhost: PTY sessions and local control sockets
//!
//! Low-level building blocks for a terminal host process on Linux:
//!
//! - `pty`: allocate a pseudoterminal, fork and exec a session on it,
//!   resize, wait and close; descriptor sanitizing for the child
//! - `socket`: Unix-domain listeners, deadline-bounded I/O, kernel timeouts,
//!   peer credentials and a threaded local server
//! - `ops`: the same operations as flat calls over raw descriptors
//! - `config`: session and server settings

pub mod config;
pub mod deadline;
pub mod error;
pub mod fd;
pub mod ops;
pub mod pty;
pub mod socket;

pub use config::Config;
pub use deadline::{Clock, Deadline, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use fd::OwnedDescriptor;
pub use pty::{PtyHandle, SessionBuilder, SessionCommand, TerminalGeometry};
pub use socket::{ClientConnection, LocalServer, PeerCredential, SocketPath};
