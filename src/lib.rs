//! # DaemonWarden
//!
//! **DaemonWarden** turns an ordinary foreground process into a single-instance
//! Unix daemon. It takes an exclusive advisory lock, drops privileges, forks
//! with a bounded parent/child handshake, detaches into its own session,
//! records its pid, and runs a signal-driven loop that cleans up the lock and
//! pid files exactly once before exiting.
//!
//! ```no_run
//! use daemon_warden::{Daemon, LogTarget, Options};
//!
//! let mut daemon = Daemon::new("svc")
//!     .lock_file("/var/lock/svc.lock")
//!     .pid_file("/var/run/svc.pid")
//!     .log_target(LogTarget::File("/var/log/svc.log".into()))
//!     .start()
//!     .unwrap_or_else(|_| std::process::exit(1));
//!
//! daemon.init_options(Options::from_env());
//! daemon.run();
//! ```

#[cfg(not(unix))]
compile_error!("daemon_warden only supports Unix platforms");

pub mod control;
mod daemon;
mod error;
mod guard;
mod handshake;
mod logging;
mod notify;
mod options;
mod privilege;
mod signals;
mod state;
mod sys;
mod types;

// Re-export public types to keep the API flat
pub use daemon::{Daemon, DaemonProcess, POLL_QUANTUM};
pub use error::{DaemonError, DaemonResult};
pub use guard::{LockHandle, PidRecord};
pub use handshake::HANDSHAKE_TIMEOUT_SECS;
pub use logging::LogTarget;
pub use notify::under_supervisor;
pub use options::Options;
pub use signals::{signal_name, target_state, triggering_signal};
pub use state::{RunState, RunStateCell, current as current_run_state};
pub use types::{Group, User};
