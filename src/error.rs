use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Custom error type for DaemonWarden.
/// Every variant aborts the daemonization sequence; no `DaemonProcess` is produced.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The lock file is held by another live instance.
    #[error("daemon is already running (lock file {path:?} is held)")]
    AlreadyRunning { path: PathBuf },

    /// The calling process is already a child of init.
    #[error("instance is already daemonized")]
    AlreadyDaemonized,

    /// A configured path is empty or cannot be passed to the OS.
    #[error("invalid path {path:?}")]
    InvalidPath { path: PathBuf },

    #[error("failed to create lock file {path:?}: {source}")]
    LockFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create pid file {path:?}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to change directory to {path:?}: {source}")]
    RunDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to redirect {stream}: {source}")]
    Redirect {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    /// Failed to drop privileges (user/group not found, or permission denied).
    #[error("privilege drop error: {0}")]
    Privilege(String),

    /// A system call (fork, setsid, sigprocmask...) failed.
    #[error("syscall '{call}' failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to set signal handler for signal {signal}: {source}")]
    Signal {
        signal: i32,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log channel: {0}")]
    Logging(String),
}

impl DaemonError {
    /// `true` when startup stopped because another instance owns the lock.
    ///
    /// This is the expected outcome of a second launch, not an operator error.
    pub fn is_already_running(&self) -> bool {
        matches!(self, DaemonError::AlreadyRunning { .. })
    }

    pub(crate) fn last_os_error(call: &'static str) -> Self {
        DaemonError::Syscall {
            call,
            source: io::Error::last_os_error(),
        }
    }
}

/// A specialized Result type for DaemonWarden operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_running_is_distinguished() {
        let err = DaemonError::AlreadyRunning {
            path: PathBuf::from("/var/lock/svc.lock"),
        };
        assert!(err.is_already_running());
        assert!(err.to_string().contains("/var/lock/svc.lock"));

        let err = DaemonError::Privilege("calling user was not root".into());
        assert!(!err.is_already_running());
    }

    #[test]
    fn syscall_error_keeps_source() {
        use std::error::Error as _;

        let err = DaemonError::Syscall {
            call: "setsid",
            source: io::Error::from_raw_os_error(libc::EPERM),
        };
        assert!(err.to_string().starts_with("syscall 'setsid' failed"));
        assert!(err.source().is_some());
    }
}
