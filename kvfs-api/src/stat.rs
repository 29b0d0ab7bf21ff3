//! POSIX-shaped basic attributes
//!
//! Every live node owns exactly one `Stat` record. The record is stored in
//! the KV index as a fixed little-endian layout and travels inside the
//! serialized file handle, so the wire size is pinned by a const assert.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::error::{FsError, Result};
use crate::time::Timespec;

/// Block size used for the `blocks` accounting field.
pub const DEV_BSIZE: u64 = 512;
/// Upper bound on a node's link count.
pub const MAX_LINK: u32 = 65535;
/// Upper bound on a symlink target.
pub const PATH_MAX: usize = 4096;

/// File type mask.
pub const S_IFMT: u32 = 0o170000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;

/// Owner read/write/execute bits.
pub const S_IRWXU: u32 = 0o700;
pub const S_IRUSR: u32 = 0o400;
pub const S_IWUSR: u32 = 0o200;
pub const S_IXUSR: u32 = 0o100;

/// Group read/write/execute bits.
pub const S_IRWXG: u32 = 0o070;
pub const S_IRGRP: u32 = 0o040;
pub const S_IWGRP: u32 = 0o020;
pub const S_IXGRP: u32 = 0o010;

/// Other read/write/execute bits.
pub const S_IRWXO: u32 = 0o007;
pub const S_IROTH: u32 = 0o004;
pub const S_IWOTH: u32 = 0o002;
pub const S_IXOTH: u32 = 0o001;

bitflags! {
    /// Which fields a stat amendment or setattr call touches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatFlags: u32 {
        const ATIME_SET   = 0x001;
        const MTIME_SET   = 0x002;
        const CTIME_SET   = 0x004;
        const INCR_LINK   = 0x008;
        const DECR_LINK   = 0x010;
        const SIZE_SET    = 0x020;
        const UID_SET     = 0x040;
        const GID_SET     = 0x080;
        const MODE_SET    = 0x100;
        /// Reserved; rejected as `Invalid` by setattr.
        const SIZE_ATTACH = 0x200;
    }
}

/// Basic attributes of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// Serialized size of a stat record.
pub const STAT_WIRE_SIZE: usize = 8 + 4 + 4 + 4 + 4 + 8 + 8 + 3 * Timespec::WIRE_SIZE;
const_assert_eq!(STAT_WIRE_SIZE, 76);

impl Stat {
    pub const WIRE_SIZE: usize = STAT_WIRE_SIZE;

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_reg(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn has_links(&self) -> bool {
        self.nlink > 0
    }

    /// `blocks` derived from a byte size.
    pub fn blocks_for(size: u64) -> u64 {
        size.div_ceil(DEV_BSIZE)
    }

    /// Sets `size` and keeps `blocks` in lockstep.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.blocks = Self::blocks_for(size);
    }

    /// Applies an amendment flag set in place. Time flags stamp the
    /// current wall clock; link flags enforce the 0..=MAX_LINK bounds.
    pub fn amend(&mut self, flags: StatFlags) -> Result<()> {
        let now = Timespec::now();

        if flags.contains(StatFlags::ATIME_SET) {
            self.atime = now;
        }
        if flags.contains(StatFlags::MTIME_SET) {
            self.mtime = now;
        }
        if flags.contains(StatFlags::CTIME_SET) {
            self.ctime = now;
        }
        if flags.contains(StatFlags::INCR_LINK) {
            if self.nlink >= MAX_LINK {
                return Err(FsError::Invalid);
            }
            self.nlink += 1;
        }
        if flags.contains(StatFlags::DECR_LINK) {
            if self.nlink == 0 {
                return Err(FsError::Invalid);
            }
            self.nlink -= 1;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        out.extend_from_slice(&self.ino.to_le_bytes());
        out.extend_from_slice(&self.mode.to_le_bytes());
        out.extend_from_slice(&self.nlink.to_le_bytes());
        out.extend_from_slice(&self.uid.to_le_bytes());
        out.extend_from_slice(&self.gid.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.blocks.to_le_bytes());
        out.extend_from_slice(&self.atime.to_bytes());
        out.extend_from_slice(&self.mtime.to_bytes());
        out.extend_from_slice(&self.ctime.to_bytes());
        debug_assert_eq!(out.len(), Self::WIRE_SIZE);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(FsError::Invalid);
        }
        let u64_at = |off: usize| u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        let u32_at = |off: usize| u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        let ts_at = |off: usize| Timespec::from_bytes(bytes[off..off + 12].try_into().unwrap());
        Ok(Self {
            ino: u64_at(0),
            mode: u32_at(8),
            nlink: u32_at(12),
            uid: u32_at(16),
            gid: u32_at(20),
            size: u64_at(24),
            blocks: u64_at(32),
            atime: ts_at(40),
            mtime: ts_at(52),
            ctime: ts_at(64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Stat {
        Stat {
            ino: 42,
            mode: S_IFREG | 0o644,
            nlink: 1,
            uid: 1000,
            gid: 1000,
            size: 1234,
            blocks: Stat::blocks_for(1234),
            atime: Timespec::new(10, 1),
            mtime: Timespec::new(20, 2),
            ctime: Timespec::new(30, 3),
        }
    }

    #[test]
    fn test_wire_round_trip() {
        let stat = sample();
        let bytes = stat.to_bytes();
        assert_eq!(bytes.len(), Stat::WIRE_SIZE);
        assert_eq!(Stat::from_bytes(&bytes).unwrap(), stat);
    }

    #[test]
    fn test_blocks_lockstep() {
        let mut stat = sample();
        stat.set_size(0);
        assert_eq!(stat.blocks, 0);
        stat.set_size(1);
        assert_eq!(stat.blocks, 1);
        stat.set_size(DEV_BSIZE * 3 + 1);
        assert_eq!(stat.blocks, 4);
    }

    #[test]
    fn test_link_bounds() {
        let mut stat = sample();
        stat.nlink = MAX_LINK;
        assert_eq!(stat.amend(StatFlags::INCR_LINK), Err(FsError::Invalid));
        stat.nlink = 0;
        assert_eq!(stat.amend(StatFlags::DECR_LINK), Err(FsError::Invalid));
        stat.nlink = 1;
        assert!(stat.amend(StatFlags::INCR_LINK).is_ok());
        assert_eq!(stat.nlink, 2);
    }

    #[test]
    fn test_amend_stamps_times() {
        let mut stat = sample();
        let before = stat.mtime;
        stat.amend(StatFlags::MTIME_SET | StatFlags::CTIME_SET).unwrap();
        assert!(stat.mtime >= before);
        assert_eq!(stat.atime, Timespec::new(10, 1));
    }

    proptest::proptest! {
        #[test]
        fn prop_wire_round_trips(
            ino in proptest::prelude::any::<u64>(),
            mode in 0u32..0o200000,
            nlink in 0u32..=MAX_LINK,
            uid in proptest::prelude::any::<u32>(),
            gid in proptest::prelude::any::<u32>(),
            size in proptest::prelude::any::<u64>(),
            sec in proptest::prelude::any::<i64>(),
            nsec in 0u32..1_000_000_000,
        ) {
            let stat = Stat {
                ino,
                mode,
                nlink,
                uid,
                gid,
                size,
                blocks: Stat::blocks_for(size),
                atime: Timespec::new(sec, nsec),
                mtime: Timespec::new(sec, nsec),
                ctime: Timespec::new(sec, nsec),
            };
            proptest::prop_assert_eq!(Stat::from_bytes(&stat.to_bytes()).unwrap(), stat);
        }
    }
}
