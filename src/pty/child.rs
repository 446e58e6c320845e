//! Child side of a PTY session
//!
//! Everything here runs in the forked child between `fork()` and `execve()`.
//! Only async-signal-safe work happens: all strings are prepared by the
//! parent, diagnostics are raw writes to stderr, and failure ends in
//! `_exit()` so no buffered state inherited from the parent is flushed twice.

use std::ffi::{CStr, CString};
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, close, dup2, execve, setsid};

use super::sanitize::{close_inherited_descriptors, STANDARD_STREAMS};

/// Everything the child needs, built before the fork
pub(crate) struct ChildPlan {
    pub master_fd: RawFd,
    pub slave_path: CString,
    pub command: CString,
    pub home_dir: CString,
    pub open_slave_context: Vec<u8>,
    pub chdir_context: Vec<u8>,
    pub exec_context: Vec<u8>,
}

impl ChildPlan {
    pub fn new(master_fd: RawFd, slave_path: CString, command: CString, home_dir: CString) -> Self {
        let open_slave_context = format!("open({:?})", slave_path).into_bytes();
        let chdir_context = format!("chdir({:?})", home_dir).into_bytes();
        let exec_context = format!("exec({:?})", command).into_bytes();
        Self {
            master_fd,
            slave_path,
            command,
            home_dir,
            open_slave_context,
            chdir_context,
            exec_context,
        }
    }
}

/// Turn the forked child into the session process. Never returns.
pub(crate) fn exec_session(plan: &ChildPlan) -> ! {
    // The supervisor may have blocked signals; the new image starts clean.
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&SigSet::all()), None);

    let _ = close(plan.master_fd);
    let _ = setsid();

    // Opening the slave as session leader makes it the controlling terminal.
    let slave = match open(plan.slave_path.as_c_str(), OFlag::O_RDWR, Mode::empty()) {
        Ok(fd) => fd,
        Err(errno) => {
            report(&plan.open_slave_context, errno);
            exit_child();
        }
    };
    for target in STANDARD_STREAMS {
        if let Err(errno) = dup2(slave, target) {
            report(b"dup2", errno);
            exit_child();
        }
    }
    if slave > libc::STDERR_FILENO {
        let _ = close(slave);
    }

    close_inherited_descriptors(&STANDARD_STREAMS);

    unsafe {
        libc::clearenv();
    }

    if let Err(errno) = chdir(plan.home_dir.as_c_str()) {
        report(&plan.chdir_context, errno);
    }

    let argv = [plan.command.as_c_str()];
    let envp: [&CStr; 0] = [];
    if let Err(errno) = execve(plan.command.as_c_str(), &argv, &envp) {
        report(&plan.exec_context, errno);
    }
    exit_child()
}

/// perror-style line on stderr without allocating
fn report(context: &[u8], errno: Errno) {
    write_stderr(context);
    write_stderr(b": ");
    write_stderr(errno.desc().as_bytes());
    write_stderr(b"\n");
}

fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            bytes.as_ptr() as *const libc::c_void,
            bytes.len(),
        );
    }
}

fn exit_child() -> ! {
    unsafe { libc::_exit(1) }
}
