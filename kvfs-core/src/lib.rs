//! Filesystem operation layer
//!
//! POSIX operation semantics built on the namespace tree and the data
//! store:
//! - filesystem lifecycle and the boot-time registry (`registry`)
//! - access checks (`cred`)
//! - attribute plumbing, the inode counter and the ino->object map
//!   (`attr`)
//! - namespace operations: create/lookup/rename/unlink/rmdir/link/
//!   readdir/symlink (`dirent`)
//! - extended attributes (`xattr`)
//! - the data path: read/write/truncate with block read-modify-write
//!   (`io`)

pub mod attr;
pub mod cred;
pub mod dirent;
pub mod io;
pub mod registry;
pub mod xattr;

use std::sync::Arc;

use kvfs_api::{NodeId, Stat};
use kvfs_dstore::Dstore;
use kvfs_kvtree::{KvTree, NsInfo};

pub use cred::access_check;
pub use dirent::{FileType, RenameFlags};
pub use registry::CfsRegistry;
pub use xattr::SetxattrFlags;

/// Inode number of every filesystem root.
pub const ROOT_INO: u64 = NodeId::ROOT.hi;
/// First inode number handed out to user entries.
pub const INO_GEN_START: u64 = ROOT_INO;

/// Sub-type of the symlink-target system attribute.
pub const SYS_ATTR_SYMLINK: u8 = 1;

/// One open filesystem: its namespace descriptor, its tree, and the
/// process data store.
pub struct CfsFs {
    ns: NsInfo,
    tree: KvTree,
    dstore: Arc<Dstore>,
}

impl CfsFs {
    pub(crate) fn new(ns: NsInfo, tree: KvTree, dstore: Arc<Dstore>) -> Self {
        Self { ns, tree, dstore }
    }

    pub fn ns(&self) -> &NsInfo {
        &self.ns
    }

    pub fn fs_id(&self) -> u16 {
        self.ns.id
    }

    pub fn tree(&self) -> &KvTree {
        &self.tree
    }

    pub fn dstore(&self) -> &Arc<Dstore> {
        &self.dstore
    }

    /// Stat shape of a fresh filesystem root.
    pub(crate) fn root_stat() -> Stat {
        let mut stat = Stat {
            ino: ROOT_INO,
            mode: kvfs_api::stat::S_IFDIR | 0o777,
            nlink: 2,
            ..Stat::default()
        };
        stat.set_size(0);
        stat
    }
}
