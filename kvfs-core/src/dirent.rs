//! Namespace operations
//!
//! Entry creation, lookup, rename, unlink, rmdir, link, readdir and the
//! symlink pair. Composed operations run under one KV transaction; any
//! failing step discards the transaction and surfaces the first error.

use kvfs_api::stat::{S_IFDIR, S_IFLNK, S_IFREG};
use kvfs_api::{
    AccessFlags, Cred, FsError, NodeId, PATH_MAX, Result, Stat, StatFlags, Str256, Timespec,
};
use kvfs_kvstore::Transaction;
use kvfs_kvtree::KvNode;

use crate::attr::{kvnode_init, kvnode_load, node_stat, update_stat};
use crate::{CfsFs, SYS_ATTR_SYMLINK};

/// Kind of entry created by `create_entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
    Symlink,
}

/// Caller-supplied context for rename.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameFlags {
    /// The destination is overwritten while some client still holds it
    /// open; destruction is deferred to the last close.
    pub is_dst_open: bool,
}

/// Validates a dentry name: no empty names, no tree punctuation, at
/// most 255 bytes.
fn check_name(name: &str) -> Result<Str256> {
    if name.is_empty() {
        return Err(FsError::Invalid);
    }
    if name == "." || name == ".." || name == "/" {
        return Err(FsError::Exists);
    }
    Str256::new(name)
}

impl CfsFs {
    /// Resolves `name` under `parent` to an inode number.
    pub fn lookup(&self, cred: &Cred, parent: u64, name: &str) -> Result<u64> {
        self.access(cred, parent, AccessFlags::READ)?;
        let k_name = check_name(name)?;
        let child = self.tree().lookup(&NodeId::from(parent), &k_name)?;
        Ok(child.ino())
    }

    /// Creates a file, directory or symlink entry under `parent` and
    /// returns the new inode number.
    pub(crate) fn create_entry(
        &self,
        cred: &Cred,
        parent: u64,
        name: &str,
        link: Option<&str>,
        mode: u32,
        ftype: FileType,
    ) -> Result<u64> {
        let k_name = check_name(name)?;

        if ftype == FileType::Symlink {
            match link {
                None => return Err(FsError::Invalid),
                Some(target) if target.is_empty() || target.len() > PATH_MAX => {
                    return Err(FsError::Invalid);
                }
                Some(_) => {}
            }
        }

        // Existing dentry wins before anything is allocated.
        match self.tree().lookup(&NodeId::from(parent), &k_name) {
            Ok(_) => return Err(FsError::Exists),
            Err(FsError::NotFound) => {}
            Err(err) => return Err(err),
        }

        // Inode allocation and the attach land in the same transaction.
        let tx = Transaction::begin(self.tree().index().as_ref())?;
        let new_ino = self.next_inode()?;

        let new_id = NodeId::from(new_ino);
        let parent_id = NodeId::from(parent);
        self.tree().attach(&parent_id, &new_id, &k_name)?;

        let now = Timespec::now();
        let mut stat = Stat {
            ino: new_ino,
            uid: cred.uid,
            gid: cred.gid,
            atime: now,
            mtime: now,
            ctime: now,
            ..Stat::default()
        };
        match ftype {
            FileType::Dir => {
                stat.mode = S_IFDIR | mode;
                stat.nlink = 2;
            }
            FileType::File => {
                stat.mode = S_IFREG | mode;
                stat.nlink = 1;
            }
            FileType::Symlink => {
                stat.mode = S_IFLNK | mode;
                stat.nlink = 1;
            }
        }

        let node = kvnode_init(self, new_ino, &stat)?;
        node.dump(self.tree())?;

        if let (FileType::Symlink, Some(target)) = (ftype, link) {
            node.set_sys_attr(self.tree(), SYS_ATTR_SYMLINK, target.as_bytes())?;
        }

        let mut parent_node = kvnode_load(self, parent)?;
        let parent_flags = if ftype == FileType::Dir {
            // The child keeps a ".." link back to the parent.
            StatFlags::MTIME_SET | StatFlags::CTIME_SET | StatFlags::INCR_LINK
        } else {
            StatFlags::MTIME_SET | StatFlags::CTIME_SET
        };
        update_stat(self, &mut parent_node, parent_flags)?;

        tx.commit()?;
        log::debug!("create_entry '{}' ino={} type={:?}", name, new_ino, ftype);
        Ok(new_ino)
    }

    /// Creates a regular file together with its backing object.
    pub fn creat(&self, cred: &Cred, parent: u64, name: &str, mode: u32) -> Result<u64> {
        self.access(cred, parent, AccessFlags::WRITE)?;
        let ino = self.create_entry(cred, parent, name, None, mode, FileType::File)?;
        let oid = self.dstore().new_oid()?;
        self.set_ino_oid(ino, &oid)?;
        self.dstore().obj_create(&oid)?;
        Ok(ino)
    }

    /// Create-and-stamp: creates a file, applies an initial stat, and
    /// returns the resulting attributes; unwinds the entry on failure.
    pub fn creat_ex(
        &self,
        cred: &Cred,
        parent: u64,
        name: &str,
        mode: u32,
        stat_in: &Stat,
        stat_in_flags: StatFlags,
    ) -> Result<(u64, Stat)> {
        let tx = Transaction::begin(self.tree().index().as_ref())?;
        let ino = self.creat(cred, parent, name, mode)?;

        let finish = (|| -> Result<Stat> {
            if !stat_in_flags.is_empty() {
                self.setattr(cred, ino, stat_in, stat_in_flags)?;
            }
            self.getattr(cred, ino)
        })();

        match finish {
            Ok(stat) => {
                tx.commit()?;
                Ok((ino, stat))
            }
            Err(err) => {
                // The staged KV writes vanish with the transaction; the
                // backend object has to go separately.
                if let Ok(oid) = self.ino_to_oid(ino) {
                    if let Err(cleanup) = self.dstore().obj_delete(&oid) {
                        log::warn!("creat_ex unwind of '{}' failed: {}", name, cleanup);
                    }
                }
                drop(tx);
                Err(err)
            }
        }
    }

    /// Creates a directory.
    pub fn mkdir(&self, cred: &Cred, parent: u64, name: &str, mode: u32) -> Result<u64> {
        self.access(cred, parent, AccessFlags::WRITE)?;
        self.create_entry(cred, parent, name, None, mode, FileType::Dir)
    }

    /// Creates a symlink pointing at `content`.
    pub fn symlink(&self, cred: &Cred, parent: u64, name: &str, content: &str) -> Result<u64> {
        // Symlink permissions are fixed; the mode is never consulted.
        const SYMLINK_MODE: u32 = 0o777;
        self.access(cred, parent, AccessFlags::WRITE)?;
        self.create_entry(cred, parent, name, Some(content), SYMLINK_MODE, FileType::Symlink)
    }

    /// Reads a symlink target into `buf`, returning the target length.
    /// `NoBuffers` when the buffer cannot hold it.
    pub fn readlink(&self, _cred: &Cred, ino: u64, buf: &mut [u8]) -> Result<usize> {
        let mut node = kvnode_load(self, ino)?;
        update_stat(self, &mut node, StatFlags::ATIME_SET)?;
        let target = node.get_sys_attr(self.tree(), SYS_ATTR_SYMLINK)?;
        debug_assert!(target.len() <= PATH_MAX);
        if target.len() > buf.len() {
            return Err(FsError::NoBuffers);
        }
        buf[..target.len()].copy_from_slice(&target);
        log::debug!("readlink ino={} -> {} bytes", ino, target.len());
        Ok(target.len())
    }

    /// Adds a hard link `dname` in `dino` pointing at `ino`.
    pub fn link(&self, cred: &Cred, ino: u64, dino: u64, dname: &str) -> Result<()> {
        let k_name = check_name(dname)?;
        let tx = Transaction::begin(self.tree().index().as_ref())?;

        self.access(cred, dino, AccessFlags::WRITE)?;
        match self.lookup(cred, dino, dname) {
            Ok(_) => return Err(FsError::Exists),
            Err(FsError::NotFound) => {}
            Err(err) => return Err(err),
        }

        self.tree()
            .attach(&NodeId::from(dino), &NodeId::from(ino), &k_name)?;

        let mut node = kvnode_load(self, ino)?;
        update_stat(self, &mut node, StatFlags::CTIME_SET | StatFlags::INCR_LINK)?;

        let mut dir_node = kvnode_load(self, dino)?;
        update_stat(
            self,
            &mut dir_node,
            StatFlags::MTIME_SET | StatFlags::CTIME_SET,
        )?;

        tx.commit()?;
        log::debug!("link ino={} -> {}/{}", ino, dino, dname);
        Ok(())
    }

    /// Removes the dentry `(parent, name)` and amends both ends:
    /// ctime+nlink on the object, mtime+ctime on the parent.
    pub fn detach(
        &self,
        cred: &Cred,
        parent: u64,
        obj: u64,
        name: &str,
    ) -> Result<()> {
        let k_name = check_name(name)?;
        self.access(cred, parent, AccessFlags::DELETE_ENTITY)?;

        let tx = Transaction::begin(self.tree().index().as_ref())?;
        self.tree().detach(&NodeId::from(parent), &k_name)?;

        let mut node = kvnode_load(self, obj)?;
        update_stat(self, &mut node, StatFlags::CTIME_SET | StatFlags::DECR_LINK)?;

        let mut parent_node = kvnode_load(self, parent)?;
        update_stat(
            self,
            &mut parent_node,
            StatFlags::CTIME_SET | StatFlags::MTIME_SET,
        )?;

        tx.commit()
    }

    /// Unlinks a non-directory entry and destroys it once orphaned.
    pub fn unlink(&self, cred: &Cred, dir: u64, ino: Option<u64>, name: &str) -> Result<()> {
        let ino = match ino {
            Some(ino) => ino,
            None => self.lookup(cred, dir, name)?,
        };
        self.detach(cred, dir, ino, name)?;
        self.destroy_orphaned_file(ino)?;
        log::debug!("unlink {}/{} ino={}", dir, name, ino);
        Ok(())
    }

    /// Removes an empty directory.
    pub fn rmdir(&self, cred: &Cred, parent: u64, name: &str) -> Result<()> {
        let k_name = check_name(name)?;
        self.access(cred, parent, AccessFlags::WRITE)?;
        let ino = self.lookup(cred, parent, name)?;

        if self.tree().has_children(&NodeId::from(ino))? {
            log::debug!("rmdir {}/{}: not empty", parent, name);
            return Err(FsError::NotEmpty);
        }

        let tx = Transaction::begin(self.tree().index().as_ref())?;
        self.tree().detach(&NodeId::from(parent), &k_name)?;

        let child_node = kvnode_load(self, ino)?;
        child_node.delete(self.tree())?;

        // The removed child held a ".." link on the parent.
        let mut parent_node = kvnode_load(self, parent)?;
        update_stat(
            self,
            &mut parent_node,
            StatFlags::DECR_LINK | StatFlags::MTIME_SET | StatFlags::CTIME_SET,
        )?;

        // Clear a stray object mapping if the store carries one.
        match self.ino_to_oid(ino) {
            Ok(oid) => {
                self.remove_all_xattr(&oid)?;
                self.del_oid(ino)?;
            }
            Err(FsError::NotFound) => {}
            Err(err) => return Err(err),
        }

        tx.commit()?;
        log::debug!("rmdir {}/{} ino={}", parent, name, ino);
        Ok(())
    }

    /// Renames `(src_dir, sname)` to `(dst_dir, dname)`, overwriting a
    /// compatible destination. `psrc`/`pdst` carry pre-resolved inodes
    /// when the caller already knows them.
    pub fn rename(
        &self,
        cred: &Cred,
        src_dir: u64,
        sname: &str,
        psrc: Option<u64>,
        dst_dir: u64,
        dname: &str,
        pdst: Option<u64>,
        flags: RenameFlags,
    ) -> Result<()> {
        let k_sname = check_name(sname)?;
        let k_dname = check_name(dname)?;

        let rename_inplace = src_dir == dst_dir;
        if rename_inplace && sname == dname {
            return Ok(());
        }

        self.access(cred, src_dir, AccessFlags::DELETE_ENTITY)?;
        if !rename_inplace {
            self.access(cred, dst_dir, AccessFlags::CREATE_ENTITY)?;
        }

        let sino = match psrc {
            Some(ino) => ino,
            None => self.lookup(cred, src_dir, sname)?,
        };

        let (overwrite, dino) = match pdst {
            Some(ino) => (true, ino),
            None => match self.lookup(cred, dst_dir, dname) {
                Ok(ino) => (true, ino),
                Err(FsError::NotFound) => (false, 0),
                Err(err) => return Err(err),
            },
        };

        let mut dst_is_dir = false;
        if overwrite {
            let s_stat = self.getattr(cred, sino)?;
            let d_stat = self.getattr(cred, dino)?;
            dst_is_dir = d_stat.is_dir();

            if s_stat.is_dir() != d_stat.is_dir() {
                log::warn!(
                    "rename: incompatible source and destination ({:o}, {:o})",
                    s_stat.mode,
                    d_stat.mode
                );
                return Err(FsError::NotDir);
            }

            if dst_is_dir {
                if self.tree().has_children(&NodeId::from(dino))? {
                    log::warn!("rename: destination {}/{} not empty", dst_dir, dname);
                    return Err(FsError::Exists);
                }
                self.rmdir(cred, dst_dir, dname)?;
            } else {
                // The destination becomes an orphan; it is destroyed
                // below, or at last close when still open.
                log::trace!("rename: detaching {} from {}", dino, dst_dir);
                self.detach(cred, dst_dir, dino, dname)?;
            }
        }

        if rename_inplace {
            self.tree_rename_link(src_dir, &k_sname, &k_dname)?;
        } else {
            let moved_is_dir = self.getattr(cred, sino)?.is_dir();

            self.tree().detach(&NodeId::from(src_dir), &k_sname)?;
            self.tree()
                .attach(&NodeId::from(dst_dir), &NodeId::from(sino), &k_dname)?;

            let mut src_node = kvnode_load(self, src_dir)?;
            let mut dst_node = kvnode_load(self, dst_dir)?;
            let mut src_flags = StatFlags::MTIME_SET | StatFlags::CTIME_SET;
            let mut dst_flags = StatFlags::MTIME_SET | StatFlags::CTIME_SET;
            if moved_is_dir {
                // The moved directory's ".." now points at dst_dir.
                src_flags |= StatFlags::DECR_LINK;
                dst_flags |= StatFlags::INCR_LINK;
            }
            update_stat(self, &mut src_node, src_flags)?;
            update_stat(self, &mut dst_node, dst_flags)?;
        }

        if overwrite && !dst_is_dir && !flags.is_dst_open {
            // The rename is already visible; a failed cleanup must not
            // undo it.
            log::trace!("rename: destroying detached file {}", dino);
            if let Err(err) = self.destroy_orphaned_file(dino) {
                log::warn!("rename: failed to destroy orphan {}: {}", dino, err);
            }
        }

        log::debug!(
            "rename {}/{} -> {}/{} (overwrite={})",
            src_dir,
            sname,
            dst_dir,
            dname,
            overwrite
        );
        Ok(())
    }

    /// Dentry-only rename within one directory; link counts are
    /// untouched.
    fn tree_rename_link(&self, parent: u64, old_name: &Str256, new_name: &Str256) -> Result<()> {
        let parent_id = NodeId::from(parent);
        debug_assert!(self.tree().lookup(&parent_id, old_name).is_ok());

        let child = self.tree().lookup(&parent_id, old_name)?;
        self.tree().detach(&parent_id, old_name)?;
        self.tree().attach(&parent_id, &child, new_name)?;

        let mut parent_node = kvnode_load(self, parent)?;
        update_stat(self, &mut parent_node, StatFlags::CTIME_SET)
    }

    /// Lists a directory: `cb(name, child_stat)` per entry in key order;
    /// returning false stops the walk. Amends the directory's atime on
    /// success.
    pub fn readdir<F>(&self, cred: &Cred, dir: u64, mut cb: F) -> Result<()>
    where
        F: FnMut(&str, &Stat) -> bool,
    {
        self.access(cred, dir, AccessFlags::LIST_DIR)?;
        let mut dir_node = kvnode_load(self, dir)?;

        let mut inner_rc: Result<()> = Ok(());
        self.tree().iter_children(&NodeId::from(dir), |name, child| {
            let child_stat = match KvNode::load(self.tree(), child.id())
                .and_then(|node| node_stat(&node))
            {
                Ok(stat) => stat,
                Err(err) => {
                    inner_rc = Err(err);
                    return false;
                }
            };
            cb(name, &child_stat)
        })?;
        inner_rc?;

        update_stat(self, &mut dir_node, StatFlags::ATIME_SET)
    }

    /// Destroys a node whose last link is gone, together with its
    /// backing state. A node that still has links is left alone.
    pub fn destroy_orphaned_file(&self, ino: u64) -> Result<()> {
        let node = kvnode_load(self, ino)?;
        let stat = node_stat(&node)?;

        if stat.has_links() {
            return Ok(());
        }

        let tx = Transaction::begin(self.tree().index().as_ref())?;
        node.delete(self.tree())?;

        if stat.is_symlink() {
            node.del_sys_attr(self.tree(), SYS_ATTR_SYMLINK)?;
        } else if stat.is_reg() {
            let oid = self.ino_to_oid(ino)?;
            self.remove_all_xattr(&oid)?;
            self.dstore().obj_delete(&oid)?;
            self.del_oid(ino)?;
        } else {
            // rmdir handles directories; nothing else can be created.
            log::error!("attempt to destroy unsupported object type {:o}", stat.mode);
            debug_assert!(false);
            return Err(FsError::Invalid);
        }

        tx.commit()?;
        log::debug!("destroyed orphaned ino={}", ino);
        Ok(())
    }
}
