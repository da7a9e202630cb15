//! Advisory file locks shared by every handoff process on the host.
//!
//! The CLI and the daemon both deliver events. A unit's state, supervisor
//! record and relation bags are read, changed and written back during one
//! delivery, so two processes must never deliver to the same unit at once.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_POLL: Duration = Duration::from_millis(20);

/// Holds an exclusive lock on a lock file until dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    _lock_file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Take the exclusive lock on `path`, waiting at most `timeout` for the
/// current holder. The file is created if missing and never removed.
pub fn acquire(path: &Path, timeout: Duration) -> io::Result<FileLockGuard> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;

    let deadline = Instant::now() + timeout;
    loop {
        if try_lock_exclusive(&file)? {
            tracing::trace!(path = %path.display(), "lock acquired");
            return Ok(FileLockGuard {
                _lock_file: file,
                path: path.to_path_buf(),
            });
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} is held by another handoff process", path.display()),
            ));
        }
        std::thread::sleep(LOCK_POLL);
    }
}

/// Non-blocking attempt; `Ok(None)` while someone else holds the lock.
pub fn try_acquire(path: &Path) -> io::Result<Option<FileLockGuard>> {
    match acquire(path, Duration::ZERO) {
        Ok(guard) => Ok(Some(guard)),
        Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` belongs to `file`, which outlives this call.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
    Ok(true)
}
