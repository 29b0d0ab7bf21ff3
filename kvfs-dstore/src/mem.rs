//! In-memory object backend
//!
//! Objects are byte vectors in a process-wide map. Reads past the stored
//! length return zeros, which also gives hole-punch-by-growth semantics
//! for free. Used by unit and scenario tests, and usable as a volatile
//! single-node store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use spin::RwLock;

use kvfs_api::{FsError, ObjId, Result};

use crate::{DstoreBackend, DstoreObj};

pub struct MemDstoreBackend {
    objects: RwLock<HashMap<ObjId, Arc<MemObject>>>,
    next_oid: AtomicU64,
    instance: u64,
    block_size: usize,
}

impl MemDstoreBackend {
    pub fn new(instance: u64, block_size: usize) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            next_oid: AtomicU64::new(1),
            instance,
            block_size,
        }
    }
}

impl DstoreBackend for MemDstoreBackend {
    fn new_oid(&self) -> Result<ObjId> {
        let lo = self.next_oid.fetch_add(1, Ordering::Relaxed);
        Ok(ObjId::new(self.instance, lo))
    }

    fn obj_create(&self, oid: &ObjId) -> Result<()> {
        let mut objects = self.objects.write();
        if objects.contains_key(oid) {
            return Err(FsError::Exists);
        }
        objects.insert(*oid, Arc::new(MemObject::new(*oid, self.block_size)));
        log::trace!("mem obj_create {}", oid);
        Ok(())
    }

    fn obj_delete(&self, oid: &ObjId) -> Result<()> {
        self.objects
            .write()
            .remove(oid)
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }

    fn obj_open(&self, oid: &ObjId) -> Result<Arc<dyn DstoreObj>> {
        let objects = self.objects.read();
        let obj = objects.get(oid).cloned().ok_or(FsError::NotFound)?;
        Ok(obj)
    }
}

struct MemObject {
    oid: ObjId,
    data: RwLock<Vec<u8>>,
    block_size: usize,
}

impl MemObject {
    fn new(oid: ObjId, block_size: usize) -> Self {
        Self {
            oid,
            data: RwLock::new(Vec::new()),
            block_size,
        }
    }

    fn check_aligned(&self, offset: u64, len: usize) -> Result<()> {
        let bs = self.block_size as u64;
        if offset % bs != 0 || len == 0 || len as u64 % bs != 0 {
            return Err(FsError::Invalid);
        }
        Ok(())
    }
}

impl DstoreObj for MemObject {
    fn oid(&self) -> &ObjId {
        &self.oid
    }

    fn read_blocks(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_aligned(offset, buf.len())?;
        let data = self.data.read();
        let start = offset as usize;
        for (i, out) in buf.iter_mut().enumerate() {
            *out = data.get(start + i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_blocks(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.check_aligned(offset, bytes.len())?;
        let mut data = self.data.write();
        let end = offset as usize + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, new_size: u64) -> Result<()> {
        let mut data = self.data.write();
        if (new_size as usize) < data.len() {
            data.truncate(new_size as usize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemDstoreBackend {
        MemDstoreBackend::new(5, 4096)
    }

    #[test]
    fn test_oids_are_monotonic() {
        let be = backend();
        let a = be.new_oid().unwrap();
        let b = be.new_oid().unwrap();
        assert!(b.lo > a.lo);
        assert_eq!(a.hi, 5);
    }

    #[test]
    fn test_holes_read_as_zeros() {
        let be = backend();
        let oid = be.new_oid().unwrap();
        be.obj_create(&oid).unwrap();
        let obj = be.obj_open(&oid).unwrap();
        obj.write_blocks(8192, &vec![3u8; 4096]).unwrap();
        let mut buf = vec![0xffu8; 4096];
        obj.read_blocks(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unaligned_io_rejected() {
        let be = backend();
        let oid = be.new_oid().unwrap();
        be.obj_create(&oid).unwrap();
        let obj = be.obj_open(&oid).unwrap();
        assert_eq!(obj.write_blocks(1, &vec![0u8; 4096]), Err(FsError::Invalid));
        let mut buf = vec![0u8; 100];
        assert_eq!(obj.read_blocks(0, &mut buf), Err(FsError::Invalid));
    }

    #[test]
    fn test_delete_then_open_is_not_found() {
        let be = backend();
        let oid = be.new_oid().unwrap();
        be.obj_create(&oid).unwrap();
        be.obj_delete(&oid).unwrap();
        assert!(matches!(be.obj_open(&oid), Err(FsError::NotFound)));
    }
}
