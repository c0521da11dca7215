//! Signal controller: maps OS signals onto [`RunState`] transitions.
//!
//! Handlers only perform the atomic state write. Logging of a received signal
//! happens later, in the run loop or the handshake wait.

use std::sync::atomic::{AtomicI32, Ordering};

use libc::c_int;
use signal_hook::consts::signal::{SIGALRM, SIGCHLD, SIGHUP, SIGTERM, SIGTSTP, SIGTTIN, SIGTTOU, SIGUSR1};

use crate::error::{DaemonError, DaemonResult};
use crate::state::{RUN_STATE, RunState};

/// Sent by the child to its parent once setup is complete.
pub(crate) const READY_SIGNAL: c_int = SIGUSR1;

/// Signals whose handlers drive the run state.
pub(crate) const TRAPPED_SIGNALS: [c_int; 4] = [SIGCHLD, SIGUSR1, SIGALRM, SIGTERM];

/// Terminal-control and job-control signals the daemon never reacts to.
pub(crate) const IGNORED_SIGNALS: [c_int; 4] = [SIGTSTP, SIGTTOU, SIGTTIN, SIGHUP];

/// Signal that caused the terminal transition, `0` until one arrives.
static TRIGGER: AtomicI32 = AtomicI32::new(0);

/// The run state a trapped signal moves the process to.
pub fn target_state(signal: c_int) -> Option<RunState> {
    match signal {
        SIGTERM | SIGUSR1 => Some(RunState::ExitSuccess),
        SIGALRM | SIGCHLD => Some(RunState::ExitFailure),
        _ => None,
    }
}

/// Human readable name, for the deferred log entry.
pub fn signal_name(signal: c_int) -> &'static str {
    match signal {
        SIGTERM => "SIGTERM",
        SIGUSR1 => "SIGUSR1",
        SIGALRM => "SIGALRM",
        SIGCHLD => "SIGCHLD",
        SIGHUP => "SIGHUP",
        SIGTSTP => "SIGTSTP",
        SIGTTIN => "SIGTTIN",
        SIGTTOU => "SIGTTOU",
        _ => "unknown",
    }
}

/// The signal that moved the run state out of `Normal`, if any.
pub fn triggering_signal() -> Option<c_int> {
    match TRIGGER.load(Ordering::SeqCst) {
        0 => None,
        signal => Some(signal),
    }
}

/// Installs the trapped set. Must run before the fork so parent and child
/// share the mapping.
pub(crate) fn install_trapped() -> DaemonResult<()> {
    for signal in TRAPPED_SIGNALS {
        let Some(target) = target_state(signal) else {
            continue;
        };
        // SAFETY: the handler body only touches lock-free atomics, which is
        // async-signal-safe.
        let registered = unsafe {
            signal_hook::low_level::register(signal, move || {
                if RUN_STATE.transition(target) {
                    TRIGGER.store(signal, Ordering::SeqCst);
                }
            })
        };
        if let Err(source) = registered {
            tracing::error!(signal = signal_name(signal), error = %source, "failed to set signal handler");
            return Err(DaemonError::Signal { signal, source });
        }
    }
    tracing::debug!("trapped signals installed");
    Ok(())
}

/// Sets the ignored set to `SIG_IGN` for the rest of the process lifetime.
pub(crate) fn install_ignored() -> DaemonResult<()> {
    for signal in IGNORED_SIGNALS {
        if unsafe { libc::signal(signal, libc::SIG_IGN) } == libc::SIG_ERR {
            let source = std::io::Error::last_os_error();
            tracing::error!(signal = signal_name(signal), error = %source, "failed to set signal as ignored");
            return Err(DaemonError::Signal { signal, source });
        }
    }
    tracing::debug!("terminal signals ignored");
    Ok(())
}
