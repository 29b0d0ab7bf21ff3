//! Attribute plumbing
//!
//! Helpers bridging inodes to tree nodes, the stat encode/decode path,
//! the per-filesystem inode counter, and the inode -> object-id map for
//! regular files.

use kvfs_api::{AccessFlags, Cred, FsError, NodeId, ObjId, Result, Stat, StatFlags};
use kvfs_kvtree::KvNode;
use kvfs_kvtree::key;

use crate::cred::access_check;
use crate::{CfsFs, INO_GEN_START};

/// Builds an in-memory node for `ino` carrying `stat` as basic attrs.
pub(crate) fn kvnode_init(fs: &CfsFs, ino: u64, stat: &Stat) -> Result<KvNode> {
    let id = NodeId::from(ino);
    let node = KvNode::init(fs.tree(), &id, &stat.to_bytes())?;
    log::trace!(
        "kvnode init {} uid={} gid={} mode={:o}",
        id,
        stat.uid,
        stat.gid,
        stat.mode & 0o7777
    );
    Ok(node)
}

/// Loads the node of `ino` from the store.
pub(crate) fn kvnode_load(fs: &CfsFs, ino: u64) -> Result<KvNode> {
    KvNode::load(fs.tree(), &NodeId::from(ino))
}

/// Decodes the stat record held by a loaded node.
pub(crate) fn node_stat(node: &KvNode) -> Result<Stat> {
    Stat::from_bytes(node.basic_attr())
}

/// Amends a loaded node's stat in place and writes it back.
pub(crate) fn update_stat(fs: &CfsFs, node: &mut KvNode, flags: StatFlags) -> Result<()> {
    let mut stat = node_stat(node)?;
    stat.amend(flags)?;
    node.set_basic_attr(stat.to_bytes());
    node.dump(fs.tree())?;
    log::trace!("update_stat {:?} for {}", flags, node.id());
    Ok(())
}

impl CfsFs {
    /// Reads the basic attributes of `ino`.
    pub fn getattr(&self, _cred: &Cred, ino: u64) -> Result<Stat> {
        let node = kvnode_load(self, ino)?;
        node_stat(&node)
    }

    /// Checks `flags` access to `ino` for `cred`.
    pub fn access(&self, cred: &Cred, ino: u64, flags: AccessFlags) -> Result<()> {
        let stat = self.getattr(cred, ino)?;
        access_check(cred, &stat, flags)
    }

    /// Applies a composed attribute change. `SIZE_SET` on a regular file
    /// is a truncate and takes the data path with it.
    pub fn setattr(
        &self,
        cred: &Cred,
        ino: u64,
        setstat: &Stat,
        flags: StatFlags,
    ) -> Result<()> {
        if flags.is_empty() {
            return Ok(());
        }
        if flags.contains(StatFlags::SIZE_ATTACH) {
            // Reserved and never exercised.
            return Err(FsError::Invalid);
        }
        if flags.contains(StatFlags::SIZE_SET) {
            let current = self.getattr(cred, ino)?;
            if current.is_reg() {
                let mut wanted = *setstat;
                wanted.blocks = Stat::blocks_for(wanted.size);
                return self.truncate(cred, ino, &wanted, flags);
            }
        }
        self.setattr_merge(cred, ino, setstat, flags)
    }

    /// The merge half of setattr: folds the selected fields of `setstat`
    /// into the stored stat and bumps ctime.
    pub(crate) fn setattr_merge(
        &self,
        cred: &Cred,
        ino: u64,
        setstat: &Stat,
        flags: StatFlags,
    ) -> Result<()> {
        let mut stat = self.getattr(cred, ino)?;
        access_check(cred, &stat, AccessFlags::SETATTR)?;

        // Metadata changed; ctime moves unless the caller pins it below.
        stat.amend(StatFlags::CTIME_SET)?;

        if flags.contains(StatFlags::MODE_SET) {
            let ifmt = stat.mode & kvfs_api::stat::S_IFMT;
            stat.mode = (setstat.mode & !kvfs_api::stat::S_IFMT) | ifmt;
        }
        if flags.contains(StatFlags::UID_SET) {
            stat.uid = setstat.uid;
        }
        if flags.contains(StatFlags::GID_SET) {
            stat.gid = setstat.gid;
        }
        if flags.contains(StatFlags::SIZE_SET) {
            stat.size = setstat.size;
            stat.blocks = setstat.blocks;
        }
        if flags.contains(StatFlags::ATIME_SET) {
            stat.atime = setstat.atime;
        }
        if flags.contains(StatFlags::MTIME_SET) {
            stat.mtime = setstat.mtime;
        }
        if flags.contains(StatFlags::CTIME_SET) {
            stat.ctime = setstat.ctime;
        }

        let node = kvnode_init(self, ino, &stat)?;
        node.dump(self.tree())?;
        log::debug!("setattr ino={} flags={:?}", ino, flags);
        Ok(())
    }

    // Inode counter: a 64-bit next-inode record addressed by the root
    // node, bumped under the same transaction that attaches a new node.

    pub(crate) fn ino_gen_init(&self) -> Result<()> {
        self.set_ino_gen(INO_GEN_START)
    }

    pub(crate) fn ino_gen_fini(&self) -> Result<()> {
        self.tree()
            .index()
            .del(&key::ino_gen_key(self.tree().root_id()))
    }

    fn set_ino_gen(&self, value: u64) -> Result<()> {
        self.tree()
            .index()
            .set(&key::ino_gen_key(self.tree().root_id()), &value.to_le_bytes())
    }

    fn get_ino_gen(&self) -> Result<u64> {
        let bytes = self
            .tree()
            .index()
            .get(&key::ino_gen_key(self.tree().root_id()))?;
        if bytes.len() != 8 {
            return Err(FsError::Invalid);
        }
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Allocates the next inode number.
    pub(crate) fn next_inode(&self) -> Result<u64> {
        let ino = self.get_ino_gen()? + 1;
        self.set_ino_gen(ino)?;
        log::trace!("next_inode -> {}", ino);
        Ok(ino)
    }

    // Inode -> object-id map for regular files.

    pub(crate) fn set_ino_oid(&self, ino: u64, oid: &ObjId) -> Result<()> {
        self.tree().index().set(
            &key::node_key(key::KeyType::InodeOid, &NodeId::from(ino)),
            &oid.to_bytes(),
        )
    }

    /// Resolves the backing object of `ino`; `NotFound` when unmapped.
    pub fn ino_to_oid(&self, ino: u64) -> Result<ObjId> {
        let bytes = self
            .tree()
            .index()
            .get(&key::node_key(key::KeyType::InodeOid, &NodeId::from(ino)))?;
        ObjId::from_bytes(&bytes)
    }

    pub(crate) fn del_oid(&self, ino: u64) -> Result<()> {
        self.tree()
            .index()
            .del(&key::node_key(key::KeyType::InodeOid, &NodeId::from(ino)))
    }
}
