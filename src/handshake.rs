//! Fork handshake between the invoking process and the daemon child.
//!
//! The parent blocks the trapped signals before forking, then waits in
//! `sigsuspend` with a two second alarm armed. The child restores the mask and
//! carries on with setup; its last step is sending [`READY_SIGNAL`] to the
//! parent. Whatever wakes the parent first decides its exit status, and the
//! parent never returns to the caller.

use crate::daemon::exit_graceful;
use crate::error::{DaemonError, DaemonResult};
use crate::signals::{self, READY_SIGNAL, TRAPPED_SIGNALS};
use crate::state::{self, RunState};
use crate::sys::unix::{self, Fork, SignalMask, pid_t};

/// Upper bound on how long the invoking shell may block.
pub const HANDSHAKE_TIMEOUT_SECS: u32 = 2;

/// Forks the process. Returns the parent pid in the child; the parent exits.
pub(crate) fn fork_active_process() -> DaemonResult<pid_t> {
    let mask = SignalMask::block(&TRAPPED_SIGNALS)?;

    match unix::fork() {
        Err(err) => {
            tracing::error!(error = %err, "failed to fork daemon");
            if let Err(restore) = mask.restore() {
                tracing::warn!(error = %restore, "failed to restore signal mask");
            }
            Err(err)
        }
        Ok(Fork::Parent(child)) => wait_for_child(child, &mask),
        Ok(Fork::Child) => {
            mask.restore()?;
            Ok(unix::getppid())
        }
    }
}

fn wait_for_child(child: pid_t, mask: &SignalMask) -> ! {
    tracing::debug!(child, timeout_secs = HANDSHAKE_TIMEOUT_SECS, "waiting for child");
    let outcome = await_outcome(mask);

    let signal = signals::triggering_signal()
        .map(signals::signal_name)
        .unwrap_or("unknown");
    match outcome {
        RunState::ExitSuccess => tracing::info!(child, signal, "child reported ready"),
        _ => tracing::error!(child, signal, "child did not report ready"),
    }
    exit_graceful(outcome.exit_code())
}

/// Sleeps with the alarm armed until the run state turns terminal.
fn await_outcome(mask: &SignalMask) -> RunState {
    unix::alarm(HANDSHAKE_TIMEOUT_SECS);
    let outcome = loop {
        let current = state::current();
        if current.is_terminal() {
            break current;
        }
        mask.suspend();
    };
    unix::alarm(0);
    outcome
}

/// Tells the waiting parent that setup finished.
pub(crate) fn notify_parent(parent: pid_t) -> DaemonResult<()> {
    unix::kill(parent, READY_SIGNAL).map_err(|source| {
        tracing::error!(parent, error = %source, "failed to close parent process");
        DaemonError::Syscall {
            call: "kill",
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_hook::consts::signal::{SIGALRM, SIGCHLD, SIGUSR1};
    use std::time::{Duration, Instant};

    /// Runs the parent side of the handshake in a forked, single-threaded
    /// process against a child running `behave(parent)`. Returns the outcome
    /// and the triggering signal, packed as `outcome * 32 + signal`.
    fn run_handshake(behave: fn(pid_t)) -> (i32, Duration) {
        let started = Instant::now();
        let tester = unsafe { libc::fork() };
        assert!(tester >= 0, "fork failed");

        if tester == 0 {
            let code = (|| -> DaemonResult<i32> {
                signals::install_trapped()?;
                let mask = SignalMask::block(&TRAPPED_SIGNALS)?;
                match unix::fork()? {
                    Fork::Child => {
                        behave(unix::getppid());
                        unsafe { libc::_exit(0) }
                    }
                    Fork::Parent(child) => {
                        let outcome = await_outcome(&mask);
                        let _ = unix::kill(child, libc::SIGKILL);
                        let kind = match outcome {
                            RunState::Normal => 0,
                            RunState::ExitSuccess => 1,
                            RunState::ExitFailure => 2,
                        };
                        Ok(kind * 32 + signals::triggering_signal().unwrap_or(0))
                    }
                }
            })()
            .unwrap_or(127);
            unsafe { libc::_exit(code) }
        }

        let mut status = 0;
        assert_eq!(unsafe { libc::waitpid(tester, &mut status, 0) }, tester);
        assert!(libc::WIFEXITED(status), "handshake process crashed");
        (libc::WEXITSTATUS(status), started.elapsed())
    }

    fn stay_silent(_parent: pid_t) {
        unsafe { libc::sleep(10) };
    }

    fn die_early(_parent: pid_t) {}

    fn report_ready(parent: pid_t) {
        let _ = unix::kill(parent, READY_SIGNAL);
        unsafe { libc::sleep(10) };
    }

    #[test]
    fn silent_child_times_out() {
        let (code, elapsed) = run_handshake(stay_silent);
        assert_eq!(code, 2 * 32 + SIGALRM);
        assert!(elapsed >= Duration::from_millis(1900), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    }

    #[test]
    fn dead_child_fails_the_handshake() {
        let (code, elapsed) = run_handshake(die_early);
        assert_eq!(code, 2 * 32 + SIGCHLD);
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    }

    #[test]
    fn ready_child_succeeds() {
        let (code, _) = run_handshake(report_ready);
        assert_eq!(code, 32 + SIGUSR1);
    }
}
