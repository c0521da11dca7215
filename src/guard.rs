//! Resource guards: the single-instance lock file and the pid record.
//!
//! Both are scoped: the explicit `release`/`remove` is the normal shutdown
//! path, and `Drop` runs the same cleanup on every other exit path (an aborted
//! startup, a dropped `DaemonProcess`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, DaemonResult};
use crate::sys::unix;

const LOCK_FILE_MODE: u32 = 0o640;
const PID_FILE_MODE: u32 = 0o644;

fn check_path(path: &Path) -> DaemonResult<()> {
    if path.as_os_str().is_empty() {
        return Err(DaemonError::InvalidPath {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// An exclusive advisory lock held on the lock file.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: Option<File>,
}

impl LockHandle {
    /// Opens (or creates) `path` and takes a non-blocking exclusive `flock`.
    ///
    /// Contention is reported as [`DaemonError::AlreadyRunning`].
    pub fn acquire(path: impl AsRef<Path>) -> DaemonResult<Self> {
        let path = path.as_ref().to_path_buf();
        check_path(&path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(LOCK_FILE_MODE)
            .open(&path)
            .map_err(|source| {
                tracing::error!(path = %path.display(), error = %source, "failed to create lock file");
                DaemonError::LockFile {
                    path: path.clone(),
                    source,
                }
            })?;

        if let Err(err) = unix::try_lock_exclusive(file.as_raw_fd()) {
            tracing::error!(path = %path.display(), error = %err, "failed to lock file");
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(DaemonError::AlreadyRunning { path });
            }
            return Err(DaemonError::LockFile { path, source: err });
        }

        tracing::debug!(path = %path.display(), "lock acquired");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file, then drops the lock. Failures are logged only.
    ///
    /// The file is unlinked while the lock is still held so a concurrent
    /// starter can never lock the inode that is about to disappear.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove file");
        }
        if let Err(err) = unix::unlock(file.as_raw_fd()) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to unlock file");
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// The pid file naming the process that holds the lock.
#[derive(Debug)]
pub struct PidRecord {
    path: PathBuf,
    pid: u32,
    removed: bool,
}

impl PidRecord {
    /// Writes `"{pid}\n"` to `path`, replacing whatever was there.
    pub fn create(path: impl AsRef<Path>, pid: u32) -> DaemonResult<Self> {
        let path = path.as_ref().to_path_buf();
        check_path(&path)?;

        let write = || -> io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(PID_FILE_MODE)
                .open(&path)?;
            writeln!(file, "{pid}")?;
            file.flush()
        };

        write().map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "failed to create pid file");
            DaemonError::PidFile {
                path: path.clone(),
                source,
            }
        })?;

        tracing::debug!(path = %path.display(), pid, "pid file written");
        Ok(Self {
            path,
            pid,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Deletes the pid file. Failures are logged only.
    pub fn remove(mut self) {
        self.remove_inner();
    }

    fn remove_inner(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove file");
        }
    }
}

impl Drop for PidRecord {
    fn drop(&mut self) {
        self.remove_inner();
    }
}
