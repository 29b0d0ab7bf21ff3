//! Error kinds shared by all KVFS layers
//!
//! Backend errors are mapped into these kinds at the driver boundary and
//! propagate unchanged through the operation layer. The FSAL maps them to
//! POSIX errno values at the host boundary.

use core::fmt;

/// Error kinds surfaced by KVFS operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    Invalid,
    NotFound,
    Exists,
    NotDir,
    NotEmpty,
    PermissionDenied,
    NoSpace,
    NoMemory,
    /// A caller-supplied value buffer cannot hold the result (xattr).
    BufferTooSmall,
    /// No buffer space for the requested transfer (readlink).
    NoBuffers,
    CrossDevice,
    NameTooLong,
    /// A backend failure that may succeed on retry.
    BackendTransient,
    /// A backend failure that will not go away on its own.
    BackendFatal,
}

pub type Result<T> = core::result::Result<T, FsError>;

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsError::Invalid => "invalid argument",
            FsError::NotFound => "not found",
            FsError::Exists => "already exists",
            FsError::NotDir => "not a directory",
            FsError::NotEmpty => "directory not empty",
            FsError::PermissionDenied => "permission denied",
            FsError::NoSpace => "no space left",
            FsError::NoMemory => "out of memory",
            FsError::BufferTooSmall => "buffer too small",
            FsError::NoBuffers => "no buffer space",
            FsError::CrossDevice => "cross-device link",
            FsError::NameTooLong => "name too long",
            FsError::BackendTransient => "transient backend failure",
            FsError::BackendFatal => "fatal backend failure",
        };
        f.write_str(name)
    }
}

impl std::error::Error for FsError {}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::AlreadyExists => FsError::Exists,
            ErrorKind::PermissionDenied => FsError::PermissionDenied,
            ErrorKind::StorageFull => FsError::NoSpace,
            ErrorKind::OutOfMemory => FsError::NoMemory,
            ErrorKind::InvalidInput => FsError::Invalid,
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                FsError::BackendTransient
            }
            _ => FsError::BackendFatal,
        }
    }
}
