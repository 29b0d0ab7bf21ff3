//! Data path: read, write, truncate
//!
//! The object backends only accept block-aligned extents, so every
//! transfer whose bounds are not on block boundaries goes through the
//! classic read-modify-write decomposition:
//!
//! ```text
//!        x <--------------- len ------------------>
//! ---|-----x1-----|------------|------------|-------x2--|----
//!    Lx1        Ux1          ...          Lx2         Ux2
//! ```
//!
//! - unaligned head: read `[Lx1, Ux1)`, splice `[x1, Ux1)`, write back
//! - aligned middle `[Lio, Uio)`: straight IO
//! - unaligned tail: read `[Lx2, Ux2)`, splice `[Lx2, x2)`, write back
//! - both ends inside one block ("insider"): a single read-modify-write
//!
//! Stat synchronization happens here as well: writes grow `size`/`blocks`
//! and stamp mtime+ctime, reads stamp atime, truncate recomputes blocks
//! and resizes the object.

use std::sync::Arc;

use kvfs_api::{AccessFlags, Cred, Result, Stat, StatFlags, Timespec};
use kvfs_dstore::DstoreObj;
use kvfs_dstore::io_op::{sync_read, sync_write};

use crate::CfsFs;
use crate::attr::{kvnode_init, kvnode_load, update_stat};
use crate::cred::access_check;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoKind {
    Read,
    Write,
}

fn lower(x: u64, bs: u64) -> u64 {
    (x / bs) * bs
}

fn upper(x: u64, bs: u64) -> u64 {
    (x / bs + 1) * bs
}

/// Performs an arbitrary-bounds transfer over a block-aligned object.
fn do_io(obj: &Arc<dyn DstoreObj>, kind: IoKind, offset: u64, buf: &mut [u8], bs: u64) -> Result<()> {
    let x1 = offset;
    let x2 = offset + buf.len() as u64;
    debug_assert!(x1 < x2);

    let lx1 = lower(x1, bs);
    let ux1 = upper(x1, bs);
    let lx2 = lower(x2, bs);
    let ux2 = upper(x2, bs);

    // Both bounds inside the same block.
    if lx1 == lx2 && ux1 == ux2 {
        let mut block = sync_read(obj, lx1, bs as usize)?;
        let at = (x1 - lx1) as usize;
        match kind {
            IoKind::Write => {
                block[at..at + buf.len()].copy_from_slice(buf);
                sync_write(obj, lx1, block)?;
            }
            IoKind::Read => {
                buf.copy_from_slice(&block[at..at + buf.len()]);
            }
        }
        return Ok(());
    }

    // Aligned span between the (possibly partial) edge blocks.
    let lio = if x1 == lx1 { x1 } else { ux1 };
    let uio = if x2 == lx2 { x2 } else { lx2 };

    let mut done = 0usize;

    if x1 != lx1 {
        let mut block = sync_read(obj, lx1, bs as usize)?;
        let at = (x1 - lx1) as usize;
        let head = (ux1 - x1) as usize;
        match kind {
            IoKind::Write => {
                block[at..].copy_from_slice(&buf[..head]);
                sync_write(obj, lx1, block)?;
            }
            IoKind::Read => {
                buf[..head].copy_from_slice(&block[at..]);
            }
        }
        done += head;
    }

    if lio != uio {
        let span = (uio - lio) as usize;
        match kind {
            IoKind::Write => {
                sync_write(obj, lio, buf[done..done + span].to_vec())?;
            }
            IoKind::Read => {
                let data = sync_read(obj, lio, span)?;
                buf[done..done + span].copy_from_slice(&data);
            }
        }
        done += span;
    }

    if x2 != lx2 {
        let mut block = sync_read(obj, lx2, bs as usize)?;
        let tail = (x2 - lx2) as usize;
        match kind {
            IoKind::Write => {
                block[..tail].copy_from_slice(&buf[done..]);
                sync_write(obj, lx2, block)?;
            }
            IoKind::Read => {
                buf[done..].copy_from_slice(&block[..tail]);
            }
        }
        done += tail;
    }

    debug_assert_eq!(done, buf.len());
    Ok(())
}

impl CfsFs {
    /// Writes `buf` at `offset`, growing the file size past EOF and
    /// stamping mtime+ctime. Returns the number of bytes written.
    pub fn write(&self, cred: &Cred, ino: u64, offset: u64, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let oid = self.ino_to_oid(ino)?;
        self.access(cred, ino, AccessFlags::WRITE)?;

        let obj = self.dstore().obj_open(&oid)?;
        let bs = self.dstore().block_size() as u64;
        let mut data = buf.to_vec();
        do_io(&obj, IoKind::Write, offset, &mut data, bs)?;

        let mut stat = self.getattr(cred, ino)?;
        let new_end = offset + buf.len() as u64;
        if new_end > stat.size {
            stat.set_size(new_end);
        }
        let now = Timespec::now();
        stat.mtime = now;
        stat.ctime = now;
        let node = kvnode_init(self, ino, &stat)?;
        node.dump(self.tree())?;

        log::trace!("write ino={} off={} len={}", ino, offset, buf.len());
        Ok(buf.len())
    }

    /// Reads into `buf` from `offset`. Returns the amount read and the
    /// end-of-file flag, clamped against the current size.
    pub fn read(&self, cred: &Cred, ino: u64, offset: u64, buf: &mut [u8]) -> Result<(usize, bool)> {
        let oid = self.ino_to_oid(ino)?;
        let stat = self.getattr(cred, ino)?;
        access_check(cred, &stat, AccessFlags::READ)?;

        if stat.size == 0 || offset >= stat.size {
            return Ok((0, true));
        }

        let count;
        let eof;
        if stat.size <= offset + buf.len() as u64 {
            count = (stat.size - offset) as usize;
            eof = true;
        } else {
            count = buf.len();
            eof = offset + count as u64 == stat.size;
        }

        if count > 0 {
            let obj = self.dstore().obj_open(&oid)?;
            let bs = self.dstore().block_size() as u64;
            do_io(&obj, IoKind::Read, offset, &mut buf[..count], bs)?;
        }

        let mut node = kvnode_load(self, ino)?;
        update_stat(self, &mut node, StatFlags::ATIME_SET)?;

        log::trace!("read ino={} off={} -> {} eof={}", ino, offset, count, eof);
        Ok((count, eof))
    }

    /// Sets a new size: metadata first, then the object. Shrinking
    /// deallocates; growth leaves a hole that reads as zeros.
    pub fn truncate(
        &self,
        cred: &Cred,
        ino: u64,
        new_stat: &Stat,
        new_stat_flags: StatFlags,
    ) -> Result<()> {
        debug_assert!(new_stat_flags.contains(StatFlags::SIZE_SET));

        let stat = self.getattr(cred, ino)?;
        let old_size = stat.size;
        let new_size = new_stat.size;

        let mut wanted = *new_stat;
        let mut flags = new_stat_flags;
        wanted.blocks = Stat::blocks_for(new_size);

        // Unless the caller pins mtime explicitly, mtime and ctime move
        // together.
        if !flags.contains(StatFlags::MTIME_SET) {
            let now = Timespec::now();
            wanted.mtime = now;
            wanted.ctime = now;
            flags |= StatFlags::MTIME_SET | StatFlags::CTIME_SET;
        }

        self.setattr_merge(cred, ino, &wanted, flags)?;

        let oid = self.ino_to_oid(ino)?;
        self.dstore().obj_resize(&oid, old_size, new_size)?;
        log::debug!("truncate ino={} {} -> {}", ino, old_size, new_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_helpers() {
        assert_eq!(lower(5000, 4096), 4096);
        assert_eq!(upper(5000, 4096), 8192);
        assert_eq!(lower(4096, 4096), 4096);
        assert_eq!(upper(4096, 4096), 8192);
    }

    #[test]
    fn test_do_io_cases() {
        use kvfs_dstore::{Dstore, DstoreConfig};
        let ds = Dstore::init(DstoreConfig::mem()).unwrap();
        let oid = ds.new_oid().unwrap();
        ds.obj_create(&oid).unwrap();
        let obj = ds.obj_open(&oid).unwrap();
        let bs = ds.block_size() as u64;

        // Insider case.
        let mut data = vec![7u8; 100];
        do_io(&obj, IoKind::Write, 3000, &mut data, bs).unwrap();
        let mut back = vec![0u8; 100];
        do_io(&obj, IoKind::Read, 3000, &mut back, bs).unwrap();
        assert_eq!(back, data);

        // Unaligned head + aligned middle + unaligned tail.
        let mut data: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        do_io(&obj, IoKind::Write, 3100, &mut data, bs).unwrap();
        let mut back = vec![0u8; 20000];
        do_io(&obj, IoKind::Read, 3100, &mut back, bs).unwrap();
        assert_eq!(back, data);

        // The earlier insider write inside [3000, 3100) survived.
        let mut head = vec![0u8; 100];
        do_io(&obj, IoKind::Read, 3000, &mut head, bs).unwrap();
        assert_eq!(head, vec![7u8; 100]);

        // Aligned-everything path.
        let mut data = vec![9u8; 8192];
        do_io(&obj, IoKind::Write, 40960, &mut data, bs).unwrap();
        let mut back = vec![0u8; 8192];
        do_io(&obj, IoKind::Read, 40960, &mut back, bs).unwrap();
        assert_eq!(back, vec![9u8; 8192]);

        // Holes read as zeros.
        let mut hole = vec![1u8; 512];
        do_io(&obj, IoKind::Read, 30000, &mut hole, bs).unwrap();
        assert!(hole.iter().all(|&b| b == 0));
    }
}
