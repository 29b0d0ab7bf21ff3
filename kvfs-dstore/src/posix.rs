//! POSIX file-per-object backend
//!
//! Each object is one file under the configured root directory, named by
//! the hex form of its id. Block reads past EOF are zero-filled, shrink
//! maps to `set_len`, and the oid generator resumes past the largest id
//! found on disk.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kvfs_api::{FsError, ObjId, Result};

use crate::{DstoreBackend, DstoreObj};

pub struct PosixDstoreBackend {
    root: PathBuf,
    next_oid: AtomicU64,
    instance: u64,
    block_size: usize,
}

fn obj_file_name(oid: &ObjId) -> String {
    format!("{:016x}-{:016x}", oid.hi, oid.lo)
}

fn parse_obj_file_name(name: &str) -> Option<ObjId> {
    let (hi, lo) = name.split_once('-')?;
    Some(ObjId::new(
        u64::from_str_radix(hi, 16).ok()?,
        u64::from_str_radix(lo, 16).ok()?,
    ))
}

impl PosixDstoreBackend {
    pub fn new(root: PathBuf, instance: u64, block_size: usize) -> Result<Self> {
        fs::create_dir_all(&root)?;
        let mut max_lo = 0;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if let Some(oid) = entry.file_name().to_str().and_then(parse_obj_file_name) {
                max_lo = max_lo.max(oid.lo);
            }
        }
        log::debug!("posix dstore at {:?}, oid seq resumes at {}", root, max_lo + 1);
        Ok(Self {
            root,
            next_oid: AtomicU64::new(max_lo + 1),
            instance,
            block_size,
        })
    }

    fn obj_path(&self, oid: &ObjId) -> PathBuf {
        self.root.join(obj_file_name(oid))
    }
}

impl DstoreBackend for PosixDstoreBackend {
    fn new_oid(&self) -> Result<ObjId> {
        let lo = self.next_oid.fetch_add(1, Ordering::Relaxed);
        Ok(ObjId::new(self.instance, lo))
    }

    fn obj_create(&self, oid: &ObjId) -> Result<()> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.obj_path(oid))
        {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(FsError::Exists),
            Err(err) => Err(err.into()),
        }
    }

    fn obj_delete(&self, oid: &ObjId) -> Result<()> {
        fs::remove_file(self.obj_path(oid)).map_err(FsError::from)
    }

    fn obj_open(&self, oid: &ObjId) -> Result<Arc<dyn DstoreObj>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.obj_path(oid))?;
        Ok(Arc::new(PosixObject {
            oid: *oid,
            file,
            block_size: self.block_size,
        }))
    }
}

struct PosixObject {
    oid: ObjId,
    file: File,
    block_size: usize,
}

impl PosixObject {
    fn check_aligned(&self, offset: u64, len: usize) -> Result<()> {
        let bs = self.block_size as u64;
        if offset % bs != 0 || len == 0 || len as u64 % bs != 0 {
            return Err(FsError::Invalid);
        }
        Ok(())
    }
}

impl DstoreObj for PosixObject {
    fn oid(&self) -> &ObjId {
        &self.oid
    }

    fn read_blocks(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_aligned(offset, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.read_at(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                // Short object; the remainder reads as zeros.
                buf[done..].fill(0);
                break;
            }
            done += n;
        }
        Ok(())
    }

    fn write_blocks(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_aligned(offset, data.len())?;
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, new_size: u64) -> Result<()> {
        if new_size < self.len()? {
            self.file.set_len(new_size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_op::{sync_read, sync_write};

    fn backend() -> (tempfile::TempDir, PosixDstoreBackend) {
        let dir = tempfile::tempdir().unwrap();
        let be = PosixDstoreBackend::new(dir.path().to_path_buf(), 2, 4096).unwrap();
        (dir, be)
    }

    #[test]
    fn test_create_open_write_read() {
        let (_dir, be) = backend();
        let oid = be.new_oid().unwrap();
        be.obj_create(&oid).unwrap();
        let obj = be.obj_open(&oid).unwrap();
        sync_write(&obj, 0, vec![0xabu8; 4096]).unwrap();
        assert_eq!(sync_read(&obj, 0, 4096).unwrap(), vec![0xabu8; 4096]);
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let (_dir, be) = backend();
        assert!(matches!(
            be.obj_open(&ObjId::new(1, 999)),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn test_oid_sequence_resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let be = PosixDstoreBackend::new(dir.path().to_path_buf(), 2, 4096).unwrap();
            let oid = be.new_oid().unwrap();
            be.obj_create(&oid).unwrap();
            oid
        };
        let be = PosixDstoreBackend::new(dir.path().to_path_buf(), 2, 4096).unwrap();
        let next = be.new_oid().unwrap();
        assert!(next.lo > first.lo);
    }
}
