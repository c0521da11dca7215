//! Operator-side helpers for a daemon identified by its pid file.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::{DaemonError, DaemonResult};
use crate::sys::unix;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read the pid stored in a pid file.
pub fn read_pid(path: impl AsRef<Path>) -> DaemonResult<u32> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| DaemonError::PidFile {
        path: path.to_path_buf(),
        source,
    })?;
    contents.trim().parse().map_err(|_| DaemonError::PidFile {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, "pid file does not hold a pid"),
    })
}

/// Check whether a process with the given pid exists.
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    match unix::kill(pid, 0) {
        Ok(()) => true,
        Err(err) => err.raw_os_error() == Some(libc::EPERM),
    }
}

/// Ask the daemon to shut down gracefully (SIGTERM).
pub fn terminate(pid: u32) -> DaemonResult<()> {
    let target = libc::pid_t::try_from(pid).map_err(|_| DaemonError::Syscall {
        call: "kill",
        source: io::Error::from_raw_os_error(libc::ESRCH),
    })?;
    unix::kill(target, libc::SIGTERM).map_err(|source| DaemonError::Syscall {
        call: "kill",
        source,
    })
}

/// Send SIGTERM and wait until the pid file disappears, up to `timeout`.
///
/// Returns `false` if the daemon did not finish its cleanup in time.
pub fn stop(pid_file: impl AsRef<Path>, timeout: Duration) -> DaemonResult<bool> {
    let pid_file = pid_file.as_ref();
    let pid = read_pid(pid_file)?;
    terminate(pid)?;

    let start = Instant::now();
    while start.elapsed() < timeout {
        if !pid_file.exists() {
            return Ok(true);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(!pid_file.exists())
}
