//! Extended attributes
//!
//! Xattrs are keyed by the node's backing object id, one KV record per
//! name. Only regular files carry an object mapping, so only they can
//! hold xattrs; anything else reports `NotFound`.

use kvfs_api::{AccessFlags, Cred, FsError, ObjId, Result};
use kvfs_kvtree::key;

use crate::CfsFs;

/// How setxattr treats an existing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetxattrFlags {
    /// Insert or overwrite.
    Upsert,
    /// Fail with `Exists` when the name is present.
    Create,
    /// Fail with `NotFound` when the name is absent.
    Replace,
}

impl CfsFs {
    fn xattr_exists(&self, oid: &ObjId, name: &str) -> Result<bool> {
        match self.tree().index().get(&key::xattr_key(oid, name.as_bytes())) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stores one xattr, honoring the create/replace discipline.
    pub fn setxattr(
        &self,
        cred: &Cred,
        ino: u64,
        name: &str,
        value: &[u8],
        flags: SetxattrFlags,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(FsError::Invalid);
        }
        self.access(cred, ino, AccessFlags::WRITE)?;
        let oid = self.ino_to_oid(ino)?;

        match flags {
            SetxattrFlags::Create if self.xattr_exists(&oid, name)? => {
                return Err(FsError::Exists);
            }
            SetxattrFlags::Replace if !self.xattr_exists(&oid, name)? => {
                return Err(FsError::NotFound);
            }
            _ => {}
        }

        self.tree()
            .index()
            .set(&key::xattr_key(&oid, name.as_bytes()), value)?;
        log::trace!("setxattr ino={} name={} len={}", ino, name, value.len());
        Ok(())
    }

    /// Reads one xattr into `buf`, returning the value length.
    /// `BufferTooSmall` when the buffer cannot hold the value.
    pub fn getxattr(&self, _cred: &Cred, ino: u64, name: &str, buf: &mut [u8]) -> Result<usize> {
        let oid = self.ino_to_oid(ino)?;
        let value = self
            .tree()
            .index()
            .get(&key::xattr_key(&oid, name.as_bytes()))?;
        if value.len() > buf.len() {
            return Err(FsError::BufferTooSmall);
        }
        buf[..value.len()].copy_from_slice(&value);
        Ok(value.len())
    }

    /// Removes one xattr. `NotFound` when absent.
    pub fn removexattr(&self, cred: &Cred, ino: u64, name: &str) -> Result<()> {
        self.access(cred, ino, AccessFlags::WRITE)?;
        let oid = self.ino_to_oid(ino)?;
        self.tree()
            .index()
            .del(&key::xattr_key(&oid, name.as_bytes()))
    }

    /// Writes the NUL-delimited xattr names of `ino` into `buf` and
    /// returns `(count, total_bytes)`. `BufferTooSmall` on overflow.
    pub fn listxattr(&self, cred: &Cred, ino: u64, buf: &mut [u8]) -> Result<(usize, usize)> {
        self.access(cred, ino, AccessFlags::READ)?;
        let oid = match self.ino_to_oid(ino) {
            Ok(oid) => oid,
            // Never had an xattr.
            Err(FsError::NotFound) => return Ok((0, 0)),
            Err(err) => return Err(err),
        };

        let prefix = key::xattr_prefix(&oid);
        let mut iter = self.tree().index().iter(&prefix)?;
        let mut count = 0;
        let mut used = 0;
        while let Some((k, _)) = iter.get() {
            if !k.starts_with(&prefix) {
                break;
            }
            let (_, name) = key::parse_xattr_key(k)?;
            if used + name.len() + 1 > buf.len() {
                return Err(FsError::BufferTooSmall);
            }
            buf[used..used + name.len()].copy_from_slice(&name);
            buf[used + name.len()] = 0;
            used += name.len() + 1;
            count += 1;
            iter.advance();
        }
        Ok((count, used))
    }

    /// Drops every xattr of an object (node destruction path).
    pub(crate) fn remove_all_xattr(&self, oid: &ObjId) -> Result<()> {
        let prefix = key::xattr_prefix(oid);
        let mut keys = Vec::new();
        {
            let mut iter = self.tree().index().iter(&prefix)?;
            while let Some((k, _)) = iter.get() {
                if !k.starts_with(&prefix) {
                    break;
                }
                keys.push(k.to_vec());
                iter.advance();
            }
        }
        for k in keys {
            self.tree().index().del(&k)?;
        }
        Ok(())
    }
}
