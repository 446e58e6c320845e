//! PTY session spawning and control
//!
//! The master side is allocated with the POSIX PTY API:
//! - posix_openpt() to open the master
//! - grantpt() to set permissions
//! - unlockpt() to unlock the slave
//! - ptsname_r() to get the slave device path

use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::signal::{kill, Signal};
use nix::sys::termios::{self, InputFlags, SetArg};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use super::child::{exec_session, ChildPlan};
use super::geometry::TerminalGeometry;
use crate::config::SessionConfig;
use crate::error::{check_fd, Error, Result};
use crate::fd::OwnedDescriptor;

/// Serializes allocate/fork so children of concurrent spawns never see each
/// other's freshly opened masters.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

/// Which program a session runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// The minimal system shell, for recovering a broken login setup
    Failsafe,
    /// The configured login program
    Login,
    /// An explicit absolute path
    Custom(PathBuf),
}

impl SessionCommand {
    pub fn from_failsafe(failsafe: bool) -> Self {
        if failsafe {
            SessionCommand::Failsafe
        } else {
            SessionCommand::Login
        }
    }

    /// Resolve to a program path using `config`
    pub fn program<'a>(&'a self, config: &'a SessionConfig) -> &'a Path {
        match self {
            SessionCommand::Failsafe => &config.failsafe_shell,
            SessionCommand::Login => &config.login_program,
            SessionCommand::Custom(path) => path,
        }
    }
}

/// How a reaped child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with code 0-255
    Exited(i32),
    /// Terminated by signal number
    Signaled(i32),
}

impl ExitStatus {
    /// Exit code, or the negated signal number
    pub fn code(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(signal) => -signal,
        }
    }

    pub fn success(&self) -> bool {
        *self == ExitStatus::Exited(0)
    }
}

/// Builder for spawning a program on a fresh PTY
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    /// Absolute program path, exec'd without arguments
    program: CString,
    /// Initial terminal geometry
    geometry: TerminalGeometry,
    /// Working directory for the child
    home_dir: CString,
}

impl SessionBuilder {
    /// Create a builder for `program`, which must be an absolute path
    pub fn new<P: AsRef<Path>>(program: P) -> Result<Self> {
        let program = program.as_ref();
        let invalid = |reason| Error::InvalidCommand {
            command: program.display().to_string(),
            reason,
        };
        if !program.is_absolute() {
            return Err(invalid("not an absolute path"));
        }
        let program = CString::new(program.as_os_str().as_bytes())
            .map_err(|_| invalid("contains a NUL byte"))?;

        Self {
            program,
            geometry: TerminalGeometry::default(),
            home_dir: CString::default(),
        }
        .home_dir(SessionConfig::default().home_dir)
    }

    /// Builder for `command` with paths taken from `config`
    pub fn from_config(command: &SessionCommand, config: &SessionConfig) -> Result<Self> {
        Self::new(command.program(config))?.home_dir(&config.home_dir)
    }

    /// Set the initial geometry
    pub fn geometry(mut self, geometry: TerminalGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Set the directory the child changes into before exec
    pub fn home_dir<P: AsRef<Path>>(mut self, dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        self.home_dir =
            CString::new(dir.as_os_str().as_bytes()).map_err(|_| Error::InvalidCommand {
                command: dir.display().to_string(),
                reason: "home directory contains a NUL byte",
            })?;
        Ok(self)
    }

    /// Allocate the PTY, fork and exec. No handle exists unless this succeeds.
    pub fn spawn(self) -> Result<PtyHandle> {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        let (master, slave_path) = open_master()?;
        tracing::debug!(fd = master.as_raw_fd(), slave = %slave_path, "allocated PTY");

        configure_line_discipline(&master)?;
        self.geometry.apply(master.as_raw_fd())?;

        let slave_path =
            CString::new(slave_path).map_err(|_| allocation("ptsname")(Errno::EINVAL))?;
        let plan = ChildPlan::new(master.as_raw_fd(), slave_path, self.program, self.home_dir);

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                tracing::info!(pid = child.as_raw(), program = ?plan.command, "spawned PTY session");
                Ok(PtyHandle {
                    master: OwnedDescriptor::new(master),
                    pid: child,
                })
            }
            Ok(ForkResult::Child) => exec_session(&plan),
            Err(errno) => {
                tracing::warn!(%errno, "fork failed");
                Err(Error::Fork(errno))
            }
        }
    }
}

/// Spawn `command` on a new PTY with the given geometry
pub fn spawn<P: AsRef<Path>>(command: P, geometry: TerminalGeometry) -> Result<PtyHandle> {
    SessionBuilder::new(command)?.geometry(geometry).spawn()
}

fn allocation(stage: &'static str) -> impl FnOnce(Errno) -> Error {
    move |source| Error::PtyAllocation { stage, source }
}

fn open_master() -> Result<(OwnedFd, String)> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
        .map_err(allocation("posix_openpt"))?;
    grantpt(&master).map_err(allocation("grantpt"))?;
    unlockpt(&master).map_err(allocation("unlockpt"))?;
    let slave_path = ptsname_r(&master).map_err(allocation("ptsname"))?;

    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
    Ok((master, slave_path))
}

/// UTF-8 aware input, no XON/XOFF so Ctrl+S never freezes output
fn configure_line_discipline(master: &OwnedFd) -> Result<()> {
    let mut tios = termios::tcgetattr(master.as_fd()).map_err(allocation("tcgetattr"))?;
    tios.input_flags |= InputFlags::IUTF8;
    tios.input_flags &= !(InputFlags::IXON | InputFlags::IXOFF);
    termios::tcsetattr(master.as_fd(), SetArg::TCSANOW, &tios).map_err(allocation("tcsetattr"))?;
    Ok(())
}

/// The controlling side of a spawned session.
///
/// The master descriptor is owned by the handle. The child must be reaped
/// exactly once, through [`PtyHandle::wait`] or [`wait`] on its pid.
#[derive(Debug)]
pub struct PtyHandle {
    master: OwnedDescriptor,
    pid: Pid,
}

impl PtyHandle {
    /// Raw master descriptor, -1 once closed
    pub fn master_fd(&self) -> RawFd {
        self.master.raw().unwrap_or(-1)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Apply a new geometry to the terminal
    pub fn resize(&self, geometry: TerminalGeometry) -> Result<()> {
        resize(self.master.raw()?, geometry)
    }

    /// Geometry currently set on the terminal
    pub fn geometry(&self) -> Result<TerminalGeometry> {
        TerminalGeometry::query(self.master.raw()?)
    }

    /// Toggle O_NONBLOCK on the master
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let fd = self.master.raw()?;
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(Error::sys("fcntl(F_GETFL)"))?;
        let flags = OFlag::from_bits_truncate(flags);
        let new_flags = if nonblocking {
            flags | OFlag::O_NONBLOCK
        } else {
            flags & !OFlag::O_NONBLOCK
        };
        fcntl(fd, FcntlArg::F_SETFL(new_flags)).map_err(Error::sys("fcntl(F_SETFL)"))?;
        Ok(())
    }

    /// A `File` over a duplicate of the master, for `Read`/`Write`
    pub fn file(&self) -> Result<File> {
        let fd = self.master.raw()?;
        let dup = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(0)).map_err(Error::sys("fcntl(F_DUPFD)"))?;
        Ok(unsafe { File::from_raw_fd(dup) })
    }

    /// Send a signal to the child
    pub fn signal(&self, signal: Signal) -> Result<()> {
        kill(self.pid, signal).map_err(Error::sys("kill"))
    }

    /// Block until the child exits and reap it
    pub fn wait(&self) -> Result<ExitStatus> {
        wait(self.pid)
    }

    /// Release the master descriptor; the child is left to the caller
    pub fn close(&mut self) -> Result<()> {
        self.master.close()
    }

    /// Split into the raw master descriptor and pid, giving up ownership
    pub fn into_raw_parts(self) -> (RawFd, Pid) {
        let pid = self.pid;
        (self.master.into_raw(), pid)
    }
}

/// Apply `geometry` to the terminal behind `master_fd`
pub fn resize(master_fd: RawFd, geometry: TerminalGeometry) -> Result<()> {
    geometry.apply(master_fd).map_err(|err| {
        tracing::warn!(fd = master_fd, %err, "resize failed");
        err
    })
}

/// Block until `pid` changes state and reap it.
///
/// Only positive pids are accepted: 0 and negative values select process
/// groups or any child.
pub fn wait(pid: Pid) -> Result<ExitStatus> {
    if pid.as_raw() <= 0 {
        return Err(Error::InvalidPid(pid.as_raw()));
    }
    match waitpid(pid, None) {
        Ok(WaitStatus::Exited(_, code)) => Ok(ExitStatus::Exited(code)),
        Ok(WaitStatus::Signaled(_, signal, _)) => Ok(ExitStatus::Signaled(signal as i32)),
        Ok(other) => Err(Error::UnexpectedWaitStatus(format!("{:?}", other))),
        Err(errno) => Err(Error::Sys {
            op: "waitpid",
            source: errno,
        }),
    }
}

/// Close a raw descriptor number.
///
/// Nothing tracks whether `fd` is still ours: closing a number twice may hit
/// an unrelated descriptor the kernel has since handed out.
pub fn close_fd(fd: RawFd) -> Result<()> {
    nix::unistd::close(check_fd(fd)?).map_err(Error::sys("close"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_code() {
        assert_eq!(ExitStatus::Exited(3).code(), 3);
        assert_eq!(ExitStatus::Signaled(9).code(), -9);
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Signaled(15).success());
    }

    #[test]
    fn test_builder_rejects_relative_program() {
        let err = SessionBuilder::new("bin/sh").unwrap_err();
        assert!(matches!(err, Error::InvalidCommand { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn test_session_command_resolution() {
        let config = SessionConfig {
            login_program: PathBuf::from("/usr/bin/login"),
            failsafe_shell: PathBuf::from("/bin/sh"),
            home_dir: PathBuf::from("/tmp"),
        };
        assert_eq!(SessionCommand::from_failsafe(true).program(&config), Path::new("/bin/sh"));
        assert_eq!(
            SessionCommand::from_failsafe(false).program(&config),
            Path::new("/usr/bin/login")
        );
        let custom = SessionCommand::Custom(PathBuf::from("/bin/true"));
        assert_eq!(custom.program(&config), Path::new("/bin/true"));
    }

    #[test]
    fn test_open_master_gives_pts_path() {
        let (master, slave) = open_master().unwrap();
        assert!(slave.starts_with("/dev/pts/"));
        configure_line_discipline(&master).unwrap();
        let tios = termios::tcgetattr(master.as_fd()).unwrap();
        assert!(tios.input_flags.contains(InputFlags::IUTF8));
        assert!(!tios.input_flags.intersects(InputFlags::IXON | InputFlags::IXOFF));
    }

    #[test]
    fn test_wait_rejects_non_positive_pid() {
        for raw in [-1, 0, -42] {
            let err = wait(Pid::from_raw(raw)).unwrap_err();
            assert!(matches!(err, Error::InvalidPid(p) if p == raw));
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_close_fd_rejects_negative() {
        assert!(matches!(close_fd(-1), Err(Error::InvalidDescriptor(-1))));
    }
}
