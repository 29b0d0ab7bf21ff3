//! Shared base types for the KVFS stack
//!
//! Every layer of the filesystem (KV store driver, data store, namespace
//! tree, operation layer, FSAL) speaks in terms of the types defined here:
//! - 128-bit node/object/index identifiers
//! - the common error kind enum and result alias
//! - bounded directory-entry names (`Str256`)
//! - POSIX-shaped attributes and their amendment flags
//! - caller credentials and access-check flags

pub mod cred;
pub mod error;
pub mod ids;
pub mod name;
pub mod stat;
pub mod time;

pub use cred::{AccessFlags, Cred, ROOT_GID, ROOT_UID};
pub use error::{FsError, Result};
pub use ids::{FsId, IndexFid, NodeId, ObjId};
pub use name::{NAME_MAX, Str256};
pub use stat::{DEV_BSIZE, MAX_LINK, PATH_MAX, Stat, StatFlags};
pub use time::Timespec;
