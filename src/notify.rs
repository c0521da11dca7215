//! Thin wrappers around sd-notify for the systemd readiness protocol.

/// `true` when a supervisor expects readiness over `NOTIFY_SOCKET`.
///
/// In that case the process must stay in the foreground instead of forking.
pub fn under_supervisor() -> bool {
    cfg!(target_os = "linux") && std::env::var_os("NOTIFY_SOCKET").is_some()
}

/// Notify systemd that the service is ready.
pub(crate) fn sd_ready() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        tracing::warn!(error = %err, "failed to notify supervisor of readiness");
    }
}

/// Notify systemd that the service is stopping.
pub(crate) fn sd_stopping() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]) {
        tracing::warn!(error = %err, "failed to notify supervisor of shutdown");
    }
}
