use crate::error::{DaemonError, DaemonResult};
use crate::types::{Group, User};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::ptr;

pub(crate) use libc::{gid_t, mode_t, pid_t, uid_t};

/// Outcome of a successful `fork(2)`.
pub(crate) enum Fork {
    Parent(pid_t),
    Child,
}

pub(crate) fn fork() -> DaemonResult<Fork> {
    // SAFETY: the process is single-threaded during daemonization.
    let pid = unsafe { libc::fork() };
    match pid {
        p if p < 0 => Err(DaemonError::last_os_error("fork")),
        0 => Ok(Fork::Child),
        p => Ok(Fork::Parent(p)),
    }
}

pub(crate) fn setsid() -> DaemonResult<pid_t> {
    let sid = unsafe { libc::setsid() };
    if sid < 0 {
        return Err(DaemonError::last_os_error("setsid"));
    }
    Ok(sid)
}

/// Session id of the calling process.
pub(crate) fn getsid() -> pid_t {
    unsafe { libc::getsid(0) }
}

pub(crate) fn set_umask(mask: mode_t) {
    unsafe {
        libc::umask(mask);
    }
}

pub(crate) fn getpid() -> pid_t {
    unsafe { libc::getpid() }
}

pub(crate) fn getppid() -> pid_t {
    unsafe { libc::getppid() }
}

/// Real and effective user id of the calling process.
pub(crate) fn user_ids() -> (uid_t, uid_t) {
    unsafe { (libc::getuid(), libc::geteuid()) }
}

/// Non-blocking exclusive `flock`.
pub(crate) fn try_lock_exclusive(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn unlock(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::flock(fd, libc::LOCK_UN) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn kill(pid: pid_t, signal: libc::c_int) -> io::Result<()> {
    if unsafe { libc::kill(pid, signal) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Arms (or with `0`, cancels) the process alarm timer.
pub(crate) fn alarm(seconds: u32) {
    unsafe {
        libc::alarm(seconds);
    }
}

/// Points stdin, stdout and stderr at `/dev/null`.
pub(crate) fn redirect_to_devnull() -> DaemonResult<()> {
    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|source| DaemonError::Redirect {
            stream: "/dev/null",
            source,
        })?
        .into_raw_fd();

    let result = [
        ("stdin", libc::STDIN_FILENO),
        ("stdout", libc::STDOUT_FILENO),
        ("stderr", libc::STDERR_FILENO),
    ]
    .into_iter()
    .try_for_each(|(stream, target)| {
        if unsafe { libc::dup2(devnull, target) } < 0 {
            return Err(DaemonError::Redirect {
                stream,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    });

    // With a closed standard stream, open() may have handed out 0..=2 itself.
    if devnull > libc::STDERR_FILENO {
        unsafe {
            libc::close(devnull);
        }
    }
    result
}

/// Resolves a user name (or numeric id) to a uid.
pub(crate) fn lookup_user(user: &User) -> DaemonResult<uid_t> {
    let cname = CString::new(user.0.as_str())
        .map_err(|_| DaemonError::Privilege(format!("invalid user name '{}'", user.0)))?;
    let pwd = unsafe { libc::getpwnam(cname.as_ptr()) };
    if !pwd.is_null() {
        return Ok(unsafe { (*pwd).pw_uid });
    }
    user.0
        .parse::<uid_t>()
        .map_err(|_| DaemonError::Privilege(format!("User '{}' not found", user.0)))
}

pub(crate) fn lookup_group(group: &Group) -> DaemonResult<gid_t> {
    let cname = CString::new(group.0.as_str())
        .map_err(|_| DaemonError::Privilege(format!("invalid group name '{}'", group.0)))?;
    let grp = unsafe { libc::getgrnam(cname.as_ptr()) };
    if !grp.is_null() {
        return Ok(unsafe { (*grp).gr_gid });
    }
    group
        .0
        .parse::<gid_t>()
        .map_err(|_| DaemonError::Privilege(format!("Group '{}' not found", group.0)))
}

pub(crate) fn set_uid(uid: uid_t) -> DaemonResult<()> {
    if unsafe { libc::setuid(uid) } < 0 {
        return Err(DaemonError::Privilege(format!(
            "Failed to setuid({}): {}",
            uid,
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Replaces the supplementary groups with `gid` alone, then switches the gid.
pub(crate) fn set_gid(gid: gid_t) -> DaemonResult<()> {
    if unsafe { libc::setgroups(1, &gid) } < 0 {
        return Err(DaemonError::Privilege(format!(
            "Failed to setgroups([{}]): {}",
            gid,
            io::Error::last_os_error()
        )));
    }
    if unsafe { libc::setgid(gid) } < 0 {
        return Err(DaemonError::Privilege(format!(
            "Failed to setgid({}): {}",
            gid,
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Signal mask saved by [`SignalMask::block`].
pub(crate) struct SignalMask {
    previous: libc::sigset_t,
    waiting: libc::sigset_t,
}

impl SignalMask {
    /// Blocks `signals` and remembers the mask that was active before.
    pub(crate) fn block(signals: &[libc::c_int]) -> DaemonResult<Self> {
        unsafe {
            let mut set: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut set);
            for &signal in signals {
                libc::sigaddset(&mut set, signal);
            }

            let mut previous: libc::sigset_t = mem::zeroed();
            if libc::sigprocmask(libc::SIG_BLOCK, &set, &mut previous) < 0 {
                return Err(DaemonError::last_os_error("sigprocmask"));
            }

            // The mask used while suspended must let every blocked signal through.
            let mut waiting = previous;
            for &signal in signals {
                libc::sigdelset(&mut waiting, signal);
            }

            Ok(SignalMask { previous, waiting })
        }
    }

    pub(crate) fn restore(&self) -> DaemonResult<()> {
        if unsafe { libc::sigprocmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut()) } < 0 {
            return Err(DaemonError::last_os_error("sigprocmask"));
        }
        Ok(())
    }

    /// Sleeps until one of the blocked signals is delivered.
    pub(crate) fn suspend(&self) {
        // sigsuspend always returns -1/EINTR once a handler has run.
        unsafe {
            libc::sigsuspend(&self.waiting);
        }
    }
}
