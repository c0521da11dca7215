//! Privilege drop to the configured run identity.

use crate::error::{DaemonError, DaemonResult};
use crate::sys::unix::{self, gid_t, uid_t};
use crate::types::{Group, User};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PrivilegeStep {
    /// Nothing to change.
    Keep,
    /// Privileged caller switching identity. The gid changes before the uid.
    Switch { uid: Option<uid_t>, gid: Option<gid_t> },
    /// A different identity was requested without root rights.
    Refuse,
}

/// Decides what to do given the caller's real/effective uid and the target.
///
/// Only a caller whose real and effective uid are both root may switch. An
/// unprivileged caller that already runs as the target user is left alone.
pub(crate) fn plan(real: uid_t, effective: uid_t, uid: Option<uid_t>, gid: Option<gid_t>) -> PrivilegeStep {
    if uid.is_none() && gid.is_none() {
        return PrivilegeStep::Keep;
    }
    if real == 0 && effective == 0 {
        return PrivilegeStep::Switch { uid, gid };
    }
    match (uid, gid) {
        (Some(uid), None) if uid == real && uid == effective => PrivilegeStep::Keep,
        _ => PrivilegeStep::Refuse,
    }
}

/// Resolves the run identity and applies it to the calling process.
pub(crate) fn drop_privileges(user: Option<&User>, group: Option<&Group>) -> DaemonResult<()> {
    let uid = user.map(unix::lookup_user).transpose()?;
    let gid = group.map(unix::lookup_group).transpose()?;
    let (real, effective) = unix::user_ids();

    match plan(real, effective, uid, gid) {
        PrivilegeStep::Keep => Ok(()),
        PrivilegeStep::Switch { uid: target_uid, gid: target_gid } => {
            if let (Some(group), Some(gid)) = (group, target_gid) {
                tracing::info!(group = %group, gid, "setting group");
                unix::set_gid(gid)?;
            }
            if let (Some(user), Some(uid)) = (user, target_uid) {
                tracing::info!(user = %user, uid, "setting user");
                unix::set_uid(uid)?;
            }
            Ok(())
        }
        PrivilegeStep::Refuse => {
            tracing::error!(uid = real, euid = effective, "failed to set run user, calling user was not root");
            Err(DaemonError::Privilege(format!(
                "calling user (uid {real}, euid {effective}) is not root"
            )))
        }
    }
}
