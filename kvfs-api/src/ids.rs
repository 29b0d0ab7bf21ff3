//! 128-bit identifiers
//!
//! Nodes, data-store objects and KV indexes are all named by 128-bit
//! identifiers split into a `(hi, lo)` pair. Inodes handed to callers are
//! the low 64 bits of a node id.

use crate::error::{FsError, Result};

/// 16-bit filesystem identifier, mapped to a KV index by the namespace layer.
pub type FsId = u16;

macro_rules! id128 {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name {
            pub hi: u64,
            pub lo: u64,
        }

        impl $name {
            pub const WIRE_SIZE: usize = 16;

            pub const fn new(hi: u64, lo: u64) -> Self {
                Self { hi, lo }
            }

            pub const fn is_null(&self) -> bool {
                self.hi == 0 && self.lo == 0
            }

            pub fn to_bytes(&self) -> [u8; 16] {
                let mut out = [0u8; 16];
                out[..8].copy_from_slice(&self.hi.to_le_bytes());
                out[8..].copy_from_slice(&self.lo.to_le_bytes());
                out
            }

            pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
                if bytes.len() != Self::WIRE_SIZE {
                    return Err(FsError::Invalid);
                }
                let hi = u64::from_le_bytes(bytes[..8].try_into().unwrap());
                let lo = u64::from_le_bytes(bytes[8..].try_into().unwrap());
                Ok(Self { hi, lo })
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{{hi={}, lo={}}}", self.hi, self.lo)
            }
        }
    };
}

id128! {
    /// Identifier of a node in the namespace tree.
    NodeId
}

id128! {
    /// Identifier of a data-store object.
    ObjId
}

id128! {
    /// Identifier of a KV index (a distinct ordered key-space).
    IndexFid
}

impl NodeId {
    /// Root node of every filesystem tree.
    pub const ROOT: NodeId = NodeId::new(2, 0);
    /// The all-zero id, used as "no node".
    pub const NULL: NodeId = NodeId::new(0, 0);

    /// The 64-bit inode number exposed to callers.
    pub const fn ino(&self) -> u64 {
        self.hi
    }
}

impl From<u64> for NodeId {
    fn from(ino: u64) -> Self {
        NodeId::new(ino, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() {
        let id = NodeId::new(0xdead_beef, 42);
        let got = NodeId::from_bytes(&id.to_bytes()).unwrap();
        assert_eq!(id, got);
    }

    #[test]
    fn test_ino_mapping() {
        let id = NodeId::from(77);
        assert_eq!(id.ino(), 77);
        assert_eq!(id.lo, 0);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert_eq!(ObjId::from_bytes(&[0u8; 5]), Err(FsError::Invalid));
    }
}
