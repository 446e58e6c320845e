//! Descriptor hygiene of spawned sessions
//!
//! Kept in its own test binary: the check counts descriptors, so it must
//! not race with other tests opening files.

use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use ptyhost::pty::{self, STANDARD_STREAMS};
use ptyhost::{PtyHandle, TerminalGeometry};

/// Write a script that prints the descriptors it was started with
fn lister_script(dir: &Path) -> PathBuf {
    let script = dir.join("list-fds");
    fs::write(&script, "#!/bin/sh\nexec /bin/ls -1 /proc/self/fd\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// Not close-on-exec, and high enough to tell apart from anything the
/// listing program opens itself.
fn leak_descriptor() -> i32 {
    let leaked = unsafe { libc::fcntl(libc::STDERR_FILENO, libc::F_DUPFD, 100) };
    assert!(leaked >= 100);
    leaked
}

/// Drain the session until the child hangs up and parse the listed fds
fn collect_listing(handle: &PtyHandle) -> Vec<i32> {
    handle.set_nonblocking(true).unwrap();
    let mut master = handle.file().unwrap();

    let mut output = Vec::new();
    let mut buf = [0u8; 1024];
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(20));
            }
            Err(_) => break,
        }
    }

    let text = String::from_utf8_lossy(&output);
    text.split_whitespace()
        .filter_map(|token| token.parse().ok())
        .collect()
}

fn assert_standard_only(fds: &[i32], leaked: i32) {
    for fd in STANDARD_STREAMS {
        assert!(fds.contains(&fd), "fd {} missing from {:?}", fd, fds);
    }
    assert!(!fds.contains(&leaked), "leaked fd {} visible in {:?}", leaked, fds);
    // 0, 1, 2 and the directory handle ls is reading
    assert!(fds.len() <= 4, "unexpected descriptors {:?}", fds);
}

#[test]
fn test_session_inherits_only_standard_streams() {
    let leaked = leak_descriptor();
    let dir = tempfile::tempdir().unwrap();
    let script = lister_script(dir.path());

    let handle = pty::spawn(&script, TerminalGeometry::default()).unwrap();
    let fds = collect_listing(&handle);
    assert!(handle.wait().unwrap().success());
    unsafe { libc::close(leaked) };

    assert_standard_only(&fds, leaked);
}

#[test]
fn test_parallel_sessions_do_not_see_each_other() {
    const SESSIONS: usize = 4;

    let leaked = leak_descriptor();
    let dir = tempfile::tempdir().unwrap();
    let script = Arc::new(lister_script(dir.path()));
    let spawned = Arc::new(Barrier::new(SESSIONS));
    let listed = Arc::new(Barrier::new(SESSIONS));

    let workers: Vec<_> = (0..SESSIONS)
        .map(|_| {
            let script = Arc::clone(&script);
            let spawned = Arc::clone(&spawned);
            let listed = Arc::clone(&listed);
            thread::spawn(move || {
                spawned.wait();
                let handle = pty::spawn(script.as_path(), TerminalGeometry::default()).unwrap();
                let fds = collect_listing(&handle);
                // Keep every master open until all children have listed
                listed.wait();
                assert!(handle.wait().unwrap().success());
                (fds, handle.master_fd())
            })
        })
        .collect();

    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    unsafe { libc::close(leaked) };

    let masters: Vec<i32> = results.iter().map(|&(_, master)| master).collect();
    for (fds, _) in &results {
        assert_standard_only(fds, leaked);
        // fd 3 is the listing's own directory handle
        for master in masters.iter().filter(|&&fd| fd > 3) {
            assert!(
                !fds.contains(master),
                "master fd {} visible in {:?}",
                master,
                fds
            );
        }
    }
}
