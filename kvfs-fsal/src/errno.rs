//! POSIX error namespace exposed to the NFS host
//!
//! Error kinds are mapped to negative errno integers at the host
//! boundary; the host translates them further into NFS status codes.

use kvfs_api::FsError;

pub const EPERM: i32 = -1;
pub const ENOENT: i32 = -2;
pub const EIO: i32 = -5;
pub const E2BIG: i32 = -7;
pub const EAGAIN: i32 = -11;
pub const ENOMEM: i32 = -12;
pub const EEXIST: i32 = -17;
pub const EXDEV: i32 = -18;
pub const ENOTDIR: i32 = -20;
pub const EINVAL: i32 = -22;
pub const ENOSPC: i32 = -28;
pub const ERANGE: i32 = -34;
pub const ENOTEMPTY: i32 = -39;
pub const ENOBUFS: i32 = -105;

/// Non-POSIX status for protocol violations (unsupported digest kinds);
/// matches the host server's SERVERFAULT class.
pub const SERVERFAULT: i32 = -10006;

/// Maps an error kind to its errno.
pub fn errno_of(err: FsError) -> i32 {
    match err {
        FsError::Invalid => EINVAL,
        FsError::NotFound => ENOENT,
        FsError::Exists => EEXIST,
        FsError::NotDir => ENOTDIR,
        FsError::NotEmpty => ENOTEMPTY,
        FsError::PermissionDenied => EPERM,
        FsError::NoSpace => ENOSPC,
        FsError::NoMemory => ENOMEM,
        FsError::BufferTooSmall => ERANGE,
        FsError::NoBuffers => ENOBUFS,
        FsError::CrossDevice => EXDEV,
        FsError::NameTooLong => E2BIG,
        FsError::BackendTransient => EAGAIN,
        FsError::BackendFatal => EIO,
    }
}
