//! Opaque file handles
//!
//! A file handle names one object across the NFS wire: the filesystem
//! id, the 128-bit node id, and a cached stat. The serialized form is
//! fixed-layout and bounded well below the NFSv4 opaque limit; `key`
//! returns the prefix that identifies the object byte-for-byte, suitable
//! for hashing in an MD cache.

use static_assertions::const_assert;

use kvfs_api::{Cred, FsError, FsId, NodeId, Result, Stat};
use kvfs_core::CfsFs;

use crate::errno;

/// Serialized handle layout: `fs_id (2) | node_id (16) | stat`.
pub const FH_WIRE_SIZE: usize = 2 + NodeId::WIRE_SIZE + Stat::WIRE_SIZE;
/// NFSv4 opaque file-handle bound.
pub const FH_MAX_SIZE: usize = 128;
const_assert!(FH_WIRE_SIZE <= FH_MAX_SIZE);

/// Wire digest classes a host may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Nfsv4,
    Nfsv3,
    FileId,
}

/// Failures of the wire (de)serialization path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FhError {
    /// Digest class other than NFSv4.
    UnsupportedDigest,
    /// Destination buffer cannot hold a serialized handle.
    TooSmall,
    /// Byte blob is not a well-formed handle.
    Malformed,
    Fs(FsError),
}

impl FhError {
    /// Errno seen by the host.
    pub fn errno(&self) -> i32 {
        match self {
            FhError::UnsupportedDigest | FhError::Malformed => errno::SERVERFAULT,
            FhError::TooSmall => errno::ENOBUFS,
            FhError::Fs(err) => errno::errno_of(*err),
        }
    }
}

impl From<FsError> for FhError {
    fn from(err: FsError) -> Self {
        FhError::Fs(err)
    }
}

/// One object as seen through the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    fs_id: FsId,
    node_id: NodeId,
    stat: Stat,
}

impl FileHandle {
    /// Builds a handle for an inode, fetching its attributes.
    pub fn from_ino(fs: &CfsFs, cred: &Cred, ino: u64) -> Result<Self> {
        let stat = fs.getattr(cred, ino)?;
        Ok(Self {
            fs_id: fs.fs_id(),
            node_id: NodeId::from(ino),
            stat,
        })
    }

    /// Handle of the filesystem root.
    pub fn getroot(fs: &CfsFs, cred: &Cred) -> Result<Self> {
        Self::from_ino(fs, cred, kvfs_core::ROOT_INO)
    }

    /// Resolves `name` under this handle to a child handle.
    pub fn lookup(&self, fs: &CfsFs, cred: &Cred, name: &str) -> Result<Self> {
        let ino = fs.lookup(cred, self.ino(), name)?;
        Self::from_ino(fs, cred, ino)
    }

    pub fn fs_id(&self) -> FsId {
        self.fs_id
    }

    pub fn ino(&self) -> u64 {
        self.node_id.ino()
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Cached attributes (from handle construction time).
    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    /// Refreshes the cached attributes from the store.
    pub fn refresh(&mut self, fs: &CfsFs, cred: &Cred) -> Result<()> {
        self.stat = fs.getattr(cred, self.ino())?;
        Ok(())
    }

    /// Hash key for MD-cache style maps; identical handles produce
    /// byte-identical keys.
    pub fn key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + NodeId::WIRE_SIZE);
        out.extend_from_slice(&self.fs_id.to_le_bytes());
        out.extend_from_slice(&self.node_id.to_bytes());
        out
    }

    /// Serializes into `buf`, returning the number of bytes written.
    pub fn serialize(
        &self,
        kind: DigestKind,
        buf: &mut [u8],
    ) -> core::result::Result<usize, FhError> {
        if kind != DigestKind::Nfsv4 {
            log::error!("only NFSv4 file handles are supported, got {:?}", kind);
            return Err(FhError::UnsupportedDigest);
        }
        if buf.len() < FH_WIRE_SIZE {
            log::error!(
                "space too small for handle (need {}, have {})",
                FH_WIRE_SIZE,
                buf.len()
            );
            return Err(FhError::TooSmall);
        }
        buf[..2].copy_from_slice(&self.fs_id.to_le_bytes());
        buf[2..18].copy_from_slice(&self.node_id.to_bytes());
        buf[18..FH_WIRE_SIZE].copy_from_slice(&self.stat.to_bytes());
        Ok(FH_WIRE_SIZE)
    }

    /// Rebuilds a handle from wire bytes, verifying that the object
    /// still exists in `fs`.
    pub fn deserialize(
        fs: &CfsFs,
        cred: &Cred,
        kind: DigestKind,
        bytes: &[u8],
    ) -> core::result::Result<Self, FhError> {
        if kind != DigestKind::Nfsv4 {
            log::error!("only NFSv4 file handles are supported, got {:?}", kind);
            return Err(FhError::UnsupportedDigest);
        }
        if bytes.len() != FH_WIRE_SIZE {
            log::error!(
                "handle size mismatch: expected {}, got {}",
                FH_WIRE_SIZE,
                bytes.len()
            );
            return Err(FhError::Malformed);
        }
        let fs_id = FsId::from_le_bytes(bytes[..2].try_into().unwrap());
        let node_id = NodeId::from_bytes(&bytes[2..18]).map_err(|_| FhError::Malformed)?;
        let wire_stat = Stat::from_bytes(&bytes[18..]).map_err(|_| FhError::Malformed)?;

        if fs_id != fs.fs_id() {
            return Err(FhError::Malformed);
        }
        // The store is authoritative; the wire stat only rides along.
        let stat = fs.getattr(cred, node_id.ino())?;
        debug_assert_eq!(wire_stat.ino, stat.ino);
        Ok(Self {
            fs_id,
            node_id,
            stat,
        })
    }
}
