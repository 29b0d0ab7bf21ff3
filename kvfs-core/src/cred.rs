//! Access checks
//!
//! Mode-bit evaluation against caller credentials. Root bypasses every
//! check; the owner may always change attributes of its own files; the
//! rest is the classic owner/group/other triad walk.

use kvfs_api::stat::{
    S_IRGRP, S_IROTH, S_IRUSR, S_IWGRP, S_IWOTH, S_IWUSR, S_IXGRP, S_IXOTH, S_IXUSR,
};
use kvfs_api::{AccessFlags, Cred, FsError, Result, Stat};

/// Verifies that `cred` may perform the operations in `flags` on an
/// object with attributes `stat`. `PermissionDenied` when a required
/// mode bit is missing.
pub fn access_check(cred: &Cred, stat: &Stat, flags: AccessFlags) -> Result<()> {
    if cred.is_root() {
        return Ok(());
    }

    let eff = flags.effective();
    let mut check = 0u32;

    if cred.uid == stat.uid {
        // The owner may always touch its own attributes.
        if flags.contains(AccessFlags::SETATTR) {
            return Ok(());
        }
        if eff.contains(AccessFlags::READ) {
            check |= S_IRUSR;
        }
        if eff.contains(AccessFlags::WRITE) {
            check |= S_IWUSR;
        }
        if eff.contains(AccessFlags::EXEC) {
            check |= S_IXUSR;
        }
    } else if cred.gid == stat.gid {
        if eff.contains(AccessFlags::READ) {
            check |= S_IRGRP;
        }
        if eff.contains(AccessFlags::WRITE) {
            check |= S_IWGRP;
        }
        if eff.contains(AccessFlags::EXEC) {
            check |= S_IXGRP;
        }
    } else {
        if eff.contains(AccessFlags::READ) {
            check |= S_IROTH;
        }
        if eff.contains(AccessFlags::WRITE) {
            check |= S_IWOTH;
        }
        if eff.contains(AccessFlags::EXEC) {
            check |= S_IXOTH;
        }
    }

    if check & stat.mode == check {
        Ok(())
    } else {
        Err(FsError::PermissionDenied)
    }
}
