use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{DaemonError, DaemonResult};
use crate::guard::{LockHandle, PidRecord};
use crate::logging::{self, LogTarget};
use crate::options::Options;
use crate::signals;
use crate::state::{self, RunState};
use crate::sys::unix::{self, mode_t};
use crate::types::{Group, User};
use crate::{handshake, notify, privilege};

/// How long the run loop sleeps between run-state checks.
pub const POLL_QUANTUM: Duration = Duration::from_millis(100);

/// Main constructor to configure and launch the daemon process.
#[derive(Debug, Clone)]
pub struct Daemon {
    pub(crate) identify_name: String,
    pub(crate) run_user: Option<User>,
    pub(crate) run_group: Option<Group>,
    pub(crate) run_directory: PathBuf,
    pub(crate) lock_file: PathBuf,
    pub(crate) pid_file: PathBuf,
    pub(crate) umask: u32,
    pub(crate) log_target: LogTarget,
}

impl Daemon {
    /// Creates a new configuration for the daemon called `identify_name`.
    ///
    /// # Defaults
    /// - Working directory: `/`
    /// - Lock file: `/var/lock/<name>.lock`
    /// - Pid file: `/var/run/<name>.pid`
    /// - Umask: `0o027`
    /// - Run user: unchanged
    /// - Logging: `<temp dir>/<name>.log`
    pub fn new(identify_name: &str) -> Self {
        Daemon {
            identify_name: identify_name.to_owned(),
            run_user: None,
            run_group: None,
            run_directory: PathBuf::from("/"),
            lock_file: PathBuf::from(format!("/var/lock/{identify_name}.lock")),
            pid_file: PathBuf::from(format!("/var/run/{identify_name}.pid")),
            umask: 0o027,
            log_target: LogTarget::for_daemon(identify_name),
        }
    }

    /// Configure and start in one call.
    ///
    /// In the invoking process this only returns on failure: after a
    /// successful fork the original process exits and the returned
    /// [`DaemonProcess`] lives in the detached child.
    pub fn create<U, D, L, P>(
        identify_name: &str,
        run_user: U,
        run_directory: D,
        lock_file: L,
        pid_file: P,
    ) -> DaemonResult<DaemonProcess>
    where
        U: Into<User>,
        D: Into<PathBuf>,
        L: Into<PathBuf>,
        P: Into<PathBuf>,
    {
        Daemon::new(identify_name)
            .run_user(run_user)
            .run_directory(run_directory)
            .lock_file(lock_file)
            .pid_file(pid_file)
            .start()
    }

    // --- Public Getters ---

    pub fn identify_name(&self) -> &str {
        &self.identify_name
    }

    pub fn lock_file_path(&self) -> &Path {
        &self.lock_file
    }

    pub fn pid_file_path(&self) -> &Path {
        &self.pid_file
    }

    pub fn run_directory_path(&self) -> &Path {
        &self.run_directory
    }

    // --- Builder Methods ---

    /// Sets the user to run the daemon as. Requires a root caller unless the
    /// process already runs as that user.
    pub fn run_user<U: Into<User>>(mut self, user: U) -> Self {
        self.run_user = Some(user.into());
        self
    }

    /// Sets the group to run the daemon as. Without it only the uid changes.
    pub fn run_group<G: Into<Group>>(mut self, group: G) -> Self {
        self.run_group = Some(group.into());
        self
    }

    /// Sets the working directory for the daemon.
    pub fn run_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.run_directory = path.into();
        self
    }

    /// Sets the path of the single-instance lock file.
    pub fn lock_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.lock_file = path.into();
        self
    }

    /// Sets the path of the pid file.
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pid_file = path.into();
        self
    }

    /// Sets the file-creation mask of the daemon.
    pub fn umask(mut self, mask: u32) -> Self {
        self.umask = mask;
        self
    }

    pub fn log_target(mut self, target: LogTarget) -> Self {
        self.log_target = target;
        self
    }

    /// Runs the daemonization sequence.
    ///
    /// Lock, privilege drop and signal handlers are set up in the invoking
    /// process. Then it forks: the parent waits for the child's readiness and
    /// exits, the child creates its session, pid file, working directory and
    /// null standard streams before reporting ready. Any failing step aborts
    /// with an error and the guards acquired so far are released.
    ///
    /// Under a systemd notify socket no fork happens; readiness goes to the
    /// supervisor instead.
    pub fn start(self) -> DaemonResult<DaemonProcess> {
        logging::open(&self.log_target)?;

        let span = tracing::info_span!(
            "daemon",
            name = %self.identify_name,
            pid = tracing::field::Empty
        );
        let daemon = {
            let _entered = span.enter();
            self.daemonize(span.clone())?
        };
        Ok(daemon)
    }

    fn daemonize(self, span: tracing::Span) -> DaemonResult<DaemonProcess> {
        // A notify-socket supervisor is normally pid 1 itself.
        let supervised = notify::under_supervisor();
        if !supervised && unix::getppid() == 1 {
            tracing::info!("instance is already daemonized");
            return Err(DaemonError::AlreadyDaemonized);
        }
        tracing::info!(pid = unix::getpid(), "started");

        // Paths are resolved before the working directory changes.
        let lock_file = absolute(&self.lock_file)?;
        let pid_file = absolute(&self.pid_file)?;

        let lock = LockHandle::acquire(&lock_file)?;
        privilege::drop_privileges(self.run_user.as_ref(), self.run_group.as_ref())?;
        signals::install_trapped()?;

        let (parent_pid, session_id) = if supervised {
            tracing::info!("supervisor detected, staying in the foreground");
            (unix::getppid(), unix::getsid())
        } else {
            let parent_pid = handshake::fork_active_process()?;
            let session_id = unix::setsid().inspect_err(|err| {
                tracing::error!(error = %err, "failed to create a new session");
            })?;
            (parent_pid, session_id)
        };

        signals::install_ignored()?;
        unix::set_umask(self.umask as mode_t);

        // Recorded once, in the process that becomes the daemon.
        let pid = unix::getpid();
        span.record("pid", pid);
        let pid_record = PidRecord::create(&pid_file, pid as u32)?;
        set_run_directory(&self.run_directory)?;
        unix::redirect_to_devnull().inspect_err(|err| {
            tracing::error!(error = %err, "failed to redirect standard streams");
        })?;

        if supervised {
            notify::sd_ready();
        } else {
            handshake::notify_parent(parent_pid)?;
        }
        tracing::info!(pid, parent_pid, session_id, "daemon running");

        Ok(DaemonProcess {
            identify_name: self.identify_name,
            run_user: self.run_user,
            run_directory: self.run_directory,
            lock_file,
            pid_file,
            file_mask: self.umask,
            pid: pid as u32,
            parent_pid: parent_pid as u32,
            session_id: session_id as u32,
            supervised,
            options: Options::default(),
            pid_record: Some(pid_record),
            lock: Some(lock),
            span,
        })
    }
}

fn absolute(path: &Path) -> DaemonResult<PathBuf> {
    std::path::absolute(path).map_err(|_| DaemonError::InvalidPath {
        path: path.to_path_buf(),
    })
}

fn set_run_directory(path: &Path) -> DaemonResult<()> {
    std::env::set_current_dir(path).map_err(|source| {
        tracing::error!(path = %path.display(), error = %source, "failed to change directory");
        DaemonError::RunDirectory {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Logs the closing notice and terminates the process.
pub(crate) fn exit_graceful(code: i32) -> ! {
    tracing::info!(pid = unix::getpid(), code, "finished");
    std::process::exit(code)
}

/// The live daemon. Only produced by a fully successful [`Daemon::start`].
///
/// Holds the lock and the pid record. They are released by the run loop on
/// shutdown, or when the value is dropped.
pub struct DaemonProcess {
    identify_name: String,
    run_user: Option<User>,
    run_directory: PathBuf,
    lock_file: PathBuf,
    pid_file: PathBuf,
    file_mask: u32,
    pid: u32,
    parent_pid: u32,
    session_id: u32,
    supervised: bool,
    options: Options,
    // Dropped in declaration order: pid record first, then the lock.
    pid_record: Option<PidRecord>,
    lock: Option<LockHandle>,
    span: tracing::Span,
}

impl fmt::Debug for DaemonProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonProcess")
            .field("identify_name", &self.identify_name)
            .field("run_user", &self.run_user)
            .field("run_directory", &self.run_directory)
            .field("lock_file", &self.lock_file)
            .field("pid_file", &self.pid_file)
            .field("file_mask", &format_args!("{:#o}", self.file_mask))
            .field("pid", &self.pid)
            .field("parent_pid", &self.parent_pid)
            .field("session_id", &self.session_id)
            .field("supervised", &self.supervised)
            .field("run_state", &self.run_state())
            .finish()
    }
}

impl DaemonProcess {
    pub fn identify_name(&self) -> &str {
        &self.identify_name
    }

    pub fn run_user(&self) -> Option<&User> {
        self.run_user.as_ref()
    }

    pub fn run_directory(&self) -> &Path {
        &self.run_directory
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn file_mask(&self) -> u32 {
        self.file_mask
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Pid of the process that invoked the factory (or the supervisor).
    pub fn parent_pid(&self) -> u32 {
        self.parent_pid
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// `true` when running in the foreground under systemd.
    pub fn is_supervised(&self) -> bool {
        self.supervised
    }

    pub fn run_state(&self) -> RunState {
        state::current()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Stores the invocation arguments and logs them, one entry per line.
    pub fn init_options(&mut self, options: Options) {
        let _entered = self.span.enter();
        for (index, value) in options.iter().enumerate() {
            tracing::info!("{index}: {value}");
        }
        self.options = options;
    }

    /// Idles until a terminal run state, then cleans up and exits.
    pub fn run(self) -> ! {
        self.run_with(|_| {})
    }

    /// Like [`run`](Self::run), calling `tick` once per poll quantum while the
    /// run state is `Normal`.
    pub fn run_with<F>(mut self, mut tick: F) -> !
    where
        F: FnMut(&DaemonProcess),
    {
        loop {
            thread::sleep(POLL_QUANTUM);
            match state::current() {
                RunState::Normal => tick(&self),
                terminal => self.shutdown(terminal),
            }
        }
    }

    fn shutdown(&mut self, outcome: RunState) -> ! {
        let span = self.span.clone();
        let _entered = span.enter();

        let signal = signals::triggering_signal()
            .map(signals::signal_name)
            .unwrap_or("unknown");
        match outcome {
            RunState::ExitFailure => tracing::error!(signal, "received failure signal, shutting down"),
            _ => tracing::info!(signal, "received termination signal, shutting down"),
        }

        if self.supervised {
            notify::sd_stopping();
        }
        self.cleanup();
        exit_graceful(outcome.exit_code())
    }

    /// Removes the pid record and releases the lock. Runs at most once.
    fn cleanup(&mut self) {
        if let Some(record) = self.pid_record.take() {
            record.remove();
        }
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
        tracing::debug!("cleanup complete");
    }
}
