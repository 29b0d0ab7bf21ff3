//! Bounded names for directory entries and filesystems
//!
//! `Str256` is a length-prefixed, NUL-terminated string with at most 255
//! bytes of content. Its on-disk form is dynamic: one length byte, the
//! content bytes, and a trailing NUL. Keys that embed a name store exactly
//! that many bytes, never the full fixed-capacity struct.

use crate::error::{FsError, Result};

/// Maximum content length of a directory-entry name.
pub const NAME_MAX: usize = 255;

/// A bounded, ordered byte string used for dentry and filesystem names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Str256 {
    bytes: Vec<u8>,
}

impl Str256 {
    /// Builds a name from a string slice. Fails with `NameTooLong` for
    /// content longer than `NAME_MAX` and `Invalid` for embedded NULs.
    pub fn new(s: &str) -> Result<Self> {
        Self::from_bytes(s.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        if bytes.contains(&0) {
            return Err(FsError::Invalid);
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> &str {
        // Construction only accepts valid UTF-8 or raw bytes from
        // encode(); decode re-validates.
        core::str::from_utf8(&self.bytes).unwrap_or("<non-utf8>")
    }

    /// Serialized size: length byte + content + NUL terminator.
    pub fn wire_len(&self) -> usize {
        1 + self.bytes.len() + 1
    }

    /// Appends the dynamic on-disk form to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.bytes.len() as u8);
        out.extend_from_slice(&self.bytes);
        out.push(0);
    }

    /// Decodes a name from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 2 {
            return Err(FsError::Invalid);
        }
        let len = bytes[0] as usize;
        if bytes.len() < 1 + len + 1 {
            return Err(FsError::Invalid);
        }
        if bytes[1 + len] != 0 {
            return Err(FsError::Invalid);
        }
        let name = Self::from_bytes(&bytes[1..1 + len])?;
        Ok((name, 1 + len + 1))
    }
}

impl core::fmt::Display for Str256 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Str256 {
    type Error = FsError;

    fn try_from(s: &str) -> Result<Self> {
        Str256::new(s)
    }
}
