//! Local (Unix-domain) stream sockets
//!
//! Listening and accepting, deadline-bounded reads and sends, kernel timeouts
//! and `SO_PEERCRED` peer identification, plus a small threaded server built
//! from those pieces.

pub mod listener;
pub mod path;
pub mod peer;
pub mod server;
pub mod stream;

pub use listener::{accept, create_server, ListenSocket, DEFAULT_BACKLOG, MAX_BACKLOG, MIN_BACKLOG};
pub use path::{SocketPath, MAX_PATH_LEN, SUN_PATH_CAPACITY};
pub use peer::PeerCredential;
pub use server::{ClientHandler, ClientSocket, LocalServer, PeerPolicy};
pub use stream::{available, read_fd, send_fd, set_read_timeout, set_send_timeout, ClientConnection};
