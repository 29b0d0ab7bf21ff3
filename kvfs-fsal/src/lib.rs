//! File-handle and state layer
//!
//! The topmost layer of the stack: what an NFS server host plugs into.
//! - `handle`: opaque file handles that round-trip through the wire
//! - `state`: share reservations, open-state lifecycle, the NFSv4-shaped
//!   `open2` family, delete-on-close and delegations
//! - `export`: endpoint (export) configuration records and the staged
//!   host-config rendering
//! - `errno`: the POSIX error namespace exposed to the host
//! - `gtbl`: bucketed lookup tables for pNFS-ish layout state

pub mod errno;
pub mod export;
pub mod gtbl;
pub mod handle;
pub mod state;

pub use export::{EndpointConfig, ExportConfigFile};
pub use gtbl::Gtbl;
pub use handle::{DigestKind, FhError, FileHandle};
pub use state::{
    CreateMode, DelegKind, FIRST_COOKIE, FsalExport, FsalObj, FsalState, OpenFlags, StateType,
};
