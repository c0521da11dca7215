//! Diagnostic channel initialization.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::error::{DaemonError, DaemonResult};

/// Where the daemon's diagnostics go.
///
/// `Stderr` output stops once the standard streams are redirected to
/// `/dev/null`, so only the invoking process's lines are kept; it is meant
/// for foreground debugging. A detached daemon should log to a `File`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    Disabled,
}

impl LogTarget {
    /// Default sink for `name`: `<temp dir>/<name>.log`.
    pub fn for_daemon(name: &str) -> Self {
        LogTarget::File(std::env::temp_dir().join(format!("{name}.log")))
    }
}

/// Install the global tracing subscriber.
///
/// The file writer is synchronous (no worker thread) so it keeps working in
/// the forked child. If the host application already installed a subscriber,
/// that one is kept.
pub(crate) fn open(target: &LogTarget) -> DaemonResult<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match target {
        LogTarget::Disabled => return Ok(()),
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init(),
        LogTarget::File(path) => {
            let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
                return Err(DaemonError::InvalidPath { path: path.clone() });
            };
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(file_name.to_string_lossy().into_owned())
                .build(dir)
                .map_err(|e| DaemonError::Logging(e.to_string()))?;

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(appender)
                .with_ansi(false)
                .try_init()
        }
    };

    if installed.is_err() {
        tracing::debug!("global subscriber already set, keeping it");
    }
    Ok(())
}
