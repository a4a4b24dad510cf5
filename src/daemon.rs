// SPDX-License-Identifier: GPL-3.0-or-later

//! Daemonization and PID-file locking, ported directly from the original
//! `main.c`'s double-fork/`setsid`/`fcntl(F_SETLK)` sequence.
//!
//! Must run strictly before the Tokio runtime is built: forking a process
//! that already has worker threads running leaves the child with a
//! half-initialized, single-threaded copy of a runtime that still thinks it
//! owns the parent's other threads, which is unsound.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    os::fd::AsRawFd,
    path::Path,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),

    #[error("setsid failed: {0}")]
    Setsid(#[source] io::Error),

    #[error("failed to open pidfile {path}: {source}")]
    PidfileOpen { path: String, #[source] source: io::Error },

    #[error("pidfile {path} is already locked by another process")]
    PidfileLocked { path: String },

    #[error("failed to write pidfile {path}: {source}")]
    PidfileWrite { path: String, #[source] source: io::Error },
}

/// Double-forks the current process into the background and detaches it
/// from its controlling terminal, in the style of a classic SysV daemon.
///
/// # Safety / ordering
/// Must be called before building any multi-threaded Tokio runtime.
pub fn daemonize() -> Result<(), DaemonError> {
    // SAFETY: fork() duplicates the whole process; at this point in startup
    // no additional threads have been spawned yet (this must be called
    // before the Tokio runtime exists), so there is nothing unsound for the
    // child to inherit in a torn state.
    match unsafe { libc::fork() } {
        -1 => return Err(DaemonError::Fork(io::Error::last_os_error())),
        0 => {}, // child continues below
        _parent_pid => std::process::exit(0),
    }

    // SAFETY: setsid() has no preconditions beyond being called from the
    // session leader's original thread, which holds here since we are the
    // freshly forked child and have not spawned any thread yet.
    if unsafe { libc::setsid() } == -1 {
        return Err(DaemonError::Setsid(io::Error::last_os_error()));
    }

    // Second fork: guarantees this process can never reacquire a
    // controlling terminal.
    match unsafe { libc::fork() } {
        -1 => return Err(DaemonError::Fork(io::Error::last_os_error())),
        0 => {},
        _parent_pid => std::process::exit(0),
    }

    redirect_standard_streams_to_devnull();

    Ok(())
}

fn redirect_standard_streams_to_devnull() {
    // Best-effort: a daemon without a terminal does not need these to
    // succeed, and there is nowhere left to report a failure to.
    if let Ok(devnull) = OpenOptions::new().read(true).write(true).open("/dev/null") {
        let fd = devnull.as_raw_fd();
        // SAFETY: dup2 onto the three standard fds is the standard
        // daemonization idiom; `devnull` stays open for the duration of the
        // three calls and is dropped right after, each target fd already
        // exists so dup2 just replaces its underlying file description.
        unsafe {
            libc::dup2(fd, libc::STDIN_FILENO);
            libc::dup2(fd, libc::STDOUT_FILENO);
            libc::dup2(fd, libc::STDERR_FILENO);
        }
    }
}

/// An exclusively locked PID file, held for the lifetime of the process.
/// Dropping it does not remove the file (matching the original's behavior:
/// the lock, not the file's existence, is what prevents a second instance).
pub struct PidFile {
    file: File,
    path: String,
}

impl PidFile {
    /// Opens (creating if necessary), exclusively locks via
    /// `fcntl(F_SETLK)`, truncates, and writes the current PID to `path`.
    pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| DaemonError::PidfileOpen {
                path: path.display().to_string(),
                source,
            })?;

        lock_exclusive(&file).map_err(|_| DaemonError::PidfileLocked {
            path: path.display().to_string(),
        })?;

        let mut file = file;
        truncate_and_write_pid(&mut file).map_err(|source| DaemonError::PidfileWrite {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self { file, path: path.display().to_string() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn lock_exclusive(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let mut lock = libc::flock {
        l_type: libc::F_WRLCK as libc::c_short,
        l_whence: libc::SEEK_SET as libc::c_short,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    // SAFETY: `lock` is a valid, fully-initialized `flock` on the stack;
    // `fd` is a live file descriptor owned by `file` for the duration of
    // the call.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETLK, &mut lock) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn truncate_and_write_pid(file: &mut File) -> io::Result<()> {
    use std::io::{Seek, SeekFrom};
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}
