//! Ordered key-value store driver contract
//!
//! The namespace layers sit on top of an abstract ordered map of byte
//! strings, organized as independent key-spaces ("indexes") named by
//! 128-bit fids:
//! - keys compare lexicographically as byte strings and iterate in that
//!   order
//! - `iter(prefix)` positions on the least key >= prefix; the caller
//!   applies any prefix filter while advancing
//! - transactions group writes on one index; a discarded transaction
//!   leaves no observable write; a backend may implement them as no-ops
//!   (best effort), so callers still bracket composed operations
//!
//! One backend ships here: an in-memory store used for tests and for
//! single-node deployments without a KV cluster.

pub mod mem;

use std::sync::Arc;

use kvfs_api::{IndexFid, Result};

pub use mem::MemKvsDriver;

/// Factory for index handles; one per KV backend.
pub trait KvsDriver: Send + Sync {
    /// Creates a new, empty index. Fails with `Exists` if the fid is taken.
    fn index_create(&self, fid: &IndexFid) -> Result<()>;

    /// Deletes an index and everything stored in it.
    fn index_delete(&self, fid: &IndexFid) -> Result<()>;

    /// Opens an existing index. `NotFound` if it was never created.
    fn index_open(&self, fid: &IndexFid) -> Result<Arc<dyn KvsIndex>>;
}

/// One open ordered key-space.
pub trait KvsIndex: Send + Sync {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// `NotFound` when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// `NotFound` when the key is absent.
    fn del(&self, key: &[u8]) -> Result<()>;

    fn begin_transaction(&self) -> Result<()>;
    fn end_transaction(&self) -> Result<()>;
    fn discard_transaction(&self) -> Result<()>;

    /// Positions an iterator on the least key >= `prefix`.
    fn iter(&self, prefix: &[u8]) -> Result<Box<dyn KvsIter>>;
}

/// Cursor over an index. The pair returned by `get` stays valid until the
/// next `advance`.
pub trait KvsIter {
    /// Current entry, or `None` once the cursor ran off the end.
    fn get(&self) -> Option<(&[u8], &[u8])>;

    /// Moves to the exact-next key in order.
    fn advance(&mut self);
}

/// Scoped transaction on one index: commit explicitly, or the drop
/// handler discards whatever was staged.
pub struct Transaction<'a> {
    index: &'a dyn KvsIndex,
    open: bool,
}

impl<'a> Transaction<'a> {
    pub fn begin(index: &'a dyn KvsIndex) -> Result<Self> {
        index.begin_transaction()?;
        Ok(Self { index, open: true })
    }

    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        self.index.end_transaction()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.index.discard_transaction() {
                log::error!("failed to discard transaction: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvfs_api::FsError;

    fn open_index() -> Arc<dyn KvsIndex> {
        let driver = MemKvsDriver::new();
        let fid = IndexFid::new(7, 7);
        driver.index_create(&fid).unwrap();
        driver.index_open(&fid).unwrap()
    }

    #[test]
    fn test_transaction_guard_commits() {
        let index = open_index();
        let tx = Transaction::begin(index.as_ref()).unwrap();
        index.set(b"k", b"v").unwrap();
        tx.commit().unwrap();
        assert_eq!(index.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn test_transaction_guard_discards_on_drop() {
        let index = open_index();
        {
            let _tx = Transaction::begin(index.as_ref()).unwrap();
            index.set(b"k", b"v").unwrap();
        }
        assert_eq!(index.get(b"k"), Err(FsError::NotFound));
    }
}
