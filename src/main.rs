//! `wardend`: daemonizes itself and idles until told to stop.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use daemon_warden::{Daemon, LogTarget, Options};

#[derive(Parser, Debug)]
#[command(name = "wardend", version, about = "Single-instance background daemon")]
struct Cli {
    /// Daemon identity used in logs and default file names
    #[arg(long, default_value = "wardend", env = "WARDEN_NAME")]
    name: String,

    /// User to run as (requires starting as root)
    #[arg(long, env = "WARDEN_USER")]
    user: Option<String>,

    /// Group to run as (requires starting as root)
    #[arg(long, env = "WARDEN_GROUP")]
    group: Option<String>,

    /// Working directory after detaching
    #[arg(long, default_value = "/", env = "WARDEN_DIRECTORY")]
    directory: PathBuf,

    /// Lock file path [default: /var/lock/<name>.lock]
    #[arg(long, env = "WARDEN_LOCK_FILE")]
    lock_file: Option<PathBuf>,

    /// Pid file path [default: /var/run/<name>.pid]
    #[arg(long, env = "WARDEN_PID_FILE")]
    pid_file: Option<PathBuf>,

    /// File-creation mask, in octal
    #[arg(long, default_value = "027", value_parser = parse_octal, env = "WARDEN_UMASK")]
    umask: u32,

    /// Log file [default: <temp dir>/<name>.log]
    #[arg(long, env = "WARDEN_LOG_FILE", conflicts_with = "log_stderr")]
    log_file: Option<PathBuf>,

    /// Log to stderr instead; the detached daemon's lines are discarded
    #[arg(long)]
    log_stderr: bool,

    /// Extra arguments, echoed to the log on startup
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    rest: Vec<String>,
}

fn parse_octal(value: &str) -> Result<u32, String> {
    u32::from_str_radix(value.trim_start_matches("0o"), 8)
        .map_err(|e| format!("'{value}' is not an octal mask: {e}"))
}

impl Cli {
    fn into_daemon(self) -> Daemon {
        let mut daemon = Daemon::new(&self.name)
            .run_directory(self.directory)
            .umask(self.umask);
        if self.log_stderr {
            daemon = daemon.log_target(LogTarget::Stderr);
        } else if let Some(path) = self.log_file {
            daemon = daemon.log_target(LogTarget::File(path));
        }
        if let Some(user) = self.user {
            daemon = daemon.run_user(user);
        }
        if let Some(group) = self.group {
            daemon = daemon.run_group(group);
        }
        if let Some(path) = self.lock_file {
            daemon = daemon.lock_file(path);
        }
        if let Some(path) = self.pid_file {
            daemon = daemon.pid_file(path);
        }
        daemon
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = Options::from_args(std::env::args().take(1).chain(cli.rest.iter().cloned()));

    match cli.into_daemon().start() {
        Ok(mut daemon) => {
            daemon.init_options(options);
            daemon.run()
        }
        Err(err) if err.is_already_running() => {
            tracing::warn!(error = %err, "another instance is running");
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!(error = %err, "daemonization failed");
            ExitCode::FAILURE
        }
    }
}
