//! Accept loop for a local control socket
//!
//! [`LocalServer`] owns a listening socket and a listener thread. Each
//! accepted client is identified through `SO_PEERCRED`, checked against a
//! [`PeerPolicy`], given default send/receive timeouts and then handed to a
//! [`ClientHandler`] on a thread of its own.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::unistd::getuid;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::deadline::{Deadline, SystemClock};
use crate::error::{Error, Result};

use super::listener::ListenSocket;
use super::path::SocketPath;
use super::peer::PeerCredential;
use super::stream::ClientConnection;

const READ_CHUNK: usize = 4096;

/// Callbacks invoked by the listener thread
pub trait ClientHandler: Send + Sync + 'static {
    /// Runs on a dedicated thread; the client is closed when it is dropped
    fn on_client_accepted(&self, client: ClientSocket);

    /// A peer failed the policy check and is about to be closed
    fn on_disallowed_client(&self, peer: &PeerCredential) {
        warn!(peer = %peer, "disallowed client");
    }

    /// A client could not be set up, or the accept loop hit a fatal error
    fn on_error(&self, error: &Error) {
        warn!(error = %error, "local server error");
    }
}

/// Which peers may talk to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPolicy {
    uid: u32,
    allow_root: bool,
}

impl PeerPolicy {
    pub fn new(uid: u32, allow_root: bool) -> Self {
        Self { uid, allow_root }
    }

    /// Same user as this process, plus root if `allow_root`
    pub fn current_user(allow_root: bool) -> Self {
        Self::new(getuid().as_raw(), allow_root)
    }

    pub fn allows(&self, peer: &PeerCredential) -> bool {
        if peer.uid < 0 {
            return false;
        }
        peer.uid as u32 == self.uid || (self.allow_root && peer.uid == 0)
    }
}

/// A server-side client connection together with who is on the other end
#[derive(Debug)]
pub struct ClientSocket {
    connection: ClientConnection,
    peer: PeerCredential,
}

impl ClientSocket {
    pub fn new(connection: ClientConnection, peer: PeerCredential) -> Self {
        Self { connection, peer }
    }

    pub fn peer(&self) -> &PeerCredential {
        &self.peer
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    /// Read into `buf` within `timeout`; zero means no deadline
    pub fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.connection.read(buf, deadline_after(timeout))
    }

    /// Send all of `buf` within `timeout`; zero means no deadline
    pub fn send(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        self.connection.send(buf, deadline_after(timeout))
    }

    /// Read until the peer stops sending.
    ///
    /// On timeout the returned error counts every byte received so far.
    pub fn read_to_end(&self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = deadline_after(timeout);
        let mut data = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = match self.connection.read(&mut chunk, deadline) {
                Ok(n) => n,
                Err(Error::Timeout { transferred }) => {
                    return Err(Error::Timeout {
                        transferred: data.len() + transferred,
                    })
                }
                Err(e) => return Err(e),
            };
            data.extend_from_slice(&chunk[..n]);
            if n < chunk.len() {
                return Ok(data);
            }
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.connection.close()
    }
}

fn deadline_after(timeout: Duration) -> Deadline {
    if timeout.is_zero() {
        Deadline::NONE
    } else {
        Deadline::after(timeout, &SystemClock)
    }
}

/// A running local server
pub struct LocalServer {
    socket: Arc<ListenSocket>,
    stopped: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl LocalServer {
    /// Bind `path` and start accepting clients for the current user
    pub fn start<H: ClientHandler>(path: SocketPath, config: &ServerConfig, handler: H) -> Result<Self> {
        let policy = PeerPolicy::current_user(config.allow_root_peers);
        Self::start_with_policy(path, config, policy, handler)
    }

    pub fn start_with_policy<H: ClientHandler>(
        path: SocketPath,
        config: &ServerConfig,
        policy: PeerPolicy,
        handler: H,
    ) -> Result<Self> {
        prepare_path(&path)?;
        let socket = Arc::new(ListenSocket::bind(path, config.backlog)?);
        let stopped = Arc::new(AtomicBool::new(false));

        let handler: Arc<dyn ClientHandler> = Arc::new(handler);
        let listener = {
            let socket = Arc::clone(&socket);
            let stopped = Arc::clone(&stopped);
            let config = config.clone();
            thread::Builder::new()
                .name("ptyhost-listener".into())
                .spawn(move || accept_loop(&socket, &stopped, &config, policy, handler))?
        };

        info!(path = %socket.path(), fd = socket.fd(), "local server started");
        Ok(Self {
            socket,
            stopped,
            listener: Some(listener),
        })
    }

    pub fn path(&self) -> &SocketPath {
        self.socket.path()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Stop accepting, wait for the listener thread, close the socket and
    /// remove its file.
    ///
    /// Clients already handed to the handler keep running. A path that no
    /// longer holds a socket is left alone.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.socket.shutdown() {
            debug!(error = %e, "listener shutdown failed");
        }
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                warn!("listener thread panicked");
            }
        }
        match Arc::get_mut(&mut self.socket) {
            Some(socket) => socket.close(),
            None => Ok(()),
        }?;
        remove_socket_file(self.socket.path())?;
        info!(path = %self.socket.path(), "local server stopped");
        Ok(())
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop local server");
        }
    }
}

/// Make a filesystem path bindable: absolute, parent present, no stale socket
fn prepare_path(path: &SocketPath) -> Result<()> {
    let Some(fs_path) = path.to_path() else {
        return Ok(());
    };
    if !fs_path.is_absolute() {
        return Err(Error::PathNotAbsolute(fs_path.to_path_buf()));
    }
    if let Some(parent) = fs_path.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(fs_path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(path = %fs_path.display(), "removing stale socket file");
            fs::remove_file(fs_path)?;
        }
        Ok(_) => return Err(Error::PathOccupied(fs_path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Delete the socket file behind `path`, if it is still one
fn remove_socket_file(path: &SocketPath) -> Result<()> {
    let Some(fs_path) = path.to_path() else {
        return Ok(());
    };
    match fs::symlink_metadata(fs_path) {
        Ok(meta) if meta.file_type().is_socket() => {
            fs::remove_file(fs_path)?;
            debug!(path = %fs_path.display(), "removed socket file");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn accept_loop(
    socket: &ListenSocket,
    stopped: &AtomicBool,
    config: &ServerConfig,
    policy: PeerPolicy,
    handler: Arc<dyn ClientHandler>,
) {
    loop {
        let connection = match socket.accept() {
            Ok(connection) => connection,
            Err(e) => {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                // The listener itself is gone; retrying would spin.
                if matches!(e.errno(), Some(libc::EBADF) | Some(libc::EINVAL)) || e.is_validation() {
                    handler.on_error(&e);
                    break;
                }
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        if stopped.load(Ordering::SeqCst) {
            break;
        }

        match admit(connection, config, &policy, handler.as_ref()) {
            Ok(Some(client)) => dispatch(client, &handler),
            Ok(None) => {}
            Err(e) => handler.on_error(&e),
        }
    }
    debug!("accept loop finished");
}

/// Identify, authorize and configure a fresh client
fn admit(
    connection: ClientConnection,
    config: &ServerConfig,
    policy: &PeerPolicy,
    handler: &dyn ClientHandler,
) -> Result<Option<ClientSocket>> {
    let peer = connection.peer_credential()?;
    if !policy.allows(&peer) {
        handler.on_disallowed_client(&peer);
        return Ok(None);
    }
    connection.set_read_timeout(config.read_timeout_ms)?;
    connection.set_send_timeout(config.send_timeout_ms)?;
    debug!(peer = %peer, fd = connection.fd(), "client accepted");
    Ok(Some(ClientSocket::new(connection, peer)))
}

fn dispatch(client: ClientSocket, handler: &Arc<dyn ClientHandler>) {
    let handler = Arc::clone(handler);
    let spawned = thread::Builder::new()
        .name("ptyhost-client".into())
        .spawn(move || handler.on_client_accepted(client));
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn client thread");
    }
}
