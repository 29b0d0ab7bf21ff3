//! Caller credentials and access-check flags

use bitflags::bitflags;

/// The root user id; access checks short-circuit for it.
pub const ROOT_UID: u32 = 0;
/// The root group id.
pub const ROOT_GID: u32 = 0;

/// Credentials of the caller of a filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cred {
    pub uid: u32,
    pub gid: u32,
}

impl Cred {
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Credentials of the superuser.
    pub const fn root() -> Self {
        Self {
            uid: ROOT_UID,
            gid: ROOT_GID,
        }
    }

    pub const fn is_root(&self) -> bool {
        self.uid == ROOT_UID
    }
}

bitflags! {
    /// What an operation intends to do with an object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const READ          = 0x01;
        const WRITE         = 0x02;
        const EXEC          = 0x04;
        const SETATTR       = 0x08;
        const LIST_DIR      = 0x10;
        const CREATE_ENTITY = 0x20;
        const DELETE_ENTITY = 0x40;
    }
}

impl AccessFlags {
    /// Collapses directory-intent flags into the plain read/write/exec
    /// checks they imply on the containing directory.
    pub fn effective(self) -> AccessFlags {
        let mut out = self & (Self::READ | Self::WRITE | Self::EXEC | Self::SETATTR);
        if self.contains(Self::LIST_DIR) {
            out |= Self::READ;
        }
        if self.intersects(Self::CREATE_ENTITY | Self::DELETE_ENTITY) {
            out |= Self::WRITE | Self::EXEC;
        }
        out
    }
}
