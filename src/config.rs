//! Configuration for sessions and the local server

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::socket::listener::{DEFAULT_BACKLOG, MAX_BACKLOG, MIN_BACKLOG};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PTY session settings
    pub session: SessionConfig,
    /// Local server settings
    pub server: ServerConfig,
}

/// Programs and directories used when spawning sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Program for regular sessions
    pub login_program: PathBuf,
    /// Minimal shell for failsafe sessions
    pub failsafe_shell: PathBuf,
    /// Working directory of the child
    pub home_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_program: env_path("SHELL").unwrap_or_else(|| PathBuf::from("/bin/bash")),
            failsafe_shell: PathBuf::from("/bin/sh"),
            home_dir: env_path("HOME").unwrap_or_else(|| PathBuf::from("/")),
        }
    }
}

/// Listener and per-client defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// listen() backlog, 1..=500
    pub backlog: i32,
    /// SO_RCVTIMEO applied to accepted clients (0 = none)
    pub read_timeout_ms: u32,
    /// SO_SNDTIMEO applied to accepted clients (0 = none)
    pub send_timeout_ms: u32,
    /// Accept root peers in addition to our own uid
    pub allow_root_peers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            read_timeout_ms: 10_000,
            send_timeout_ms: 10_000,
            allow_root_peers: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values the kernel or exec would reject later
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BACKLOG..=MAX_BACKLOG).contains(&self.server.backlog) {
            return Err(Error::Config(format!(
                "server.backlog {} is outside of {}..={}",
                self.server.backlog, MIN_BACKLOG, MAX_BACKLOG
            )));
        }
        for (key, path) in [
            ("session.login_program", &self.session.login_program),
            ("session.failsafe_shell", &self.session.failsafe_shell),
        ] {
            if !path.is_absolute() {
                return Err(Error::Config(format!(
                    "{} must be an absolute path, got {:?}",
                    key, path
                )));
            }
        }
        Ok(())
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
}
