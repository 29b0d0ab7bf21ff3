//! In-memory ordered KV backend
//!
//! A `BTreeMap` behind a lock per index gives byte-lexicographic ordering
//! for free. Transactions stage set/del operations in an overlay that is
//! applied atomically on commit and dropped on discard; reads and
//! iterators observe the overlay so a composed operation sees its own
//! staged writes. Transactions nest (a depth counter), matching callers
//! that bracket a composed operation which itself brackets sub-steps.
//!
//! Interleaving transactions on one index from different threads is not
//! supported; composed operations serialize per filesystem above this
//! layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use spin::Mutex;

use kvfs_api::{FsError, IndexFid, Result};

use crate::{KvsDriver, KvsIndex, KvsIter};

/// In-memory KV driver; holds every index created through it.
pub struct MemKvsDriver {
    indexes: Mutex<BTreeMap<IndexFid, Arc<MemIndex>>>,
}

impl MemKvsDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            indexes: Mutex::new(BTreeMap::new()),
        })
    }
}

impl KvsDriver for MemKvsDriver {
    fn index_create(&self, fid: &IndexFid) -> Result<()> {
        let mut indexes = self.indexes.lock();
        if indexes.contains_key(fid) {
            return Err(FsError::Exists);
        }
        indexes.insert(*fid, Arc::new(MemIndex::default()));
        log::trace!("index_create fid={}", fid);
        Ok(())
    }

    fn index_delete(&self, fid: &IndexFid) -> Result<()> {
        self.indexes
            .lock()
            .remove(fid)
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }

    fn index_open(&self, fid: &IndexFid) -> Result<Arc<dyn KvsIndex>> {
        let indexes = self.indexes.lock();
        let index = indexes.get(fid).cloned().ok_or(FsError::NotFound)?;
        Ok(index)
    }
}

#[derive(Default)]
struct MemIndexInner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Staged writes; `None` marks a pending delete.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    tx_depth: u32,
}

impl MemIndexInner {
    fn in_tx(&self) -> bool {
        self.tx_depth > 0
    }

    fn lookup(&self, key: &[u8]) -> Option<&Vec<u8>> {
        if self.in_tx() {
            if let Some(staged) = self.overlay.get(key) {
                return staged.as_ref();
            }
        }
        self.map.get(key)
    }
}

#[derive(Default)]
struct MemIndex {
    inner: Mutex<MemIndexInner>,
}

impl KvsIndex for MemIndex {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.in_tx() {
            inner.overlay.insert(key.to_vec(), Some(value.to_vec()));
        } else {
            inner.map.insert(key.to_vec(), value.to_vec());
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        inner.lookup(key).cloned().ok_or(FsError::NotFound)
    }

    fn del(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.lookup(key).is_none() {
            return Err(FsError::NotFound);
        }
        if inner.in_tx() {
            inner.overlay.insert(key.to_vec(), None);
        } else {
            inner.map.remove(key);
        }
        Ok(())
    }

    fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.tx_depth += 1;
        Ok(())
    }

    fn end_transaction(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.tx_depth == 0 {
            return Err(FsError::Invalid);
        }
        inner.tx_depth -= 1;
        if inner.tx_depth == 0 {
            let staged = core::mem::take(&mut inner.overlay);
            for (key, value) in staged {
                match value {
                    Some(value) => {
                        inner.map.insert(key, value);
                    }
                    None => {
                        inner.map.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn discard_transaction(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.tx_depth == 0 {
            return Err(FsError::Invalid);
        }
        // Discard aborts the whole composed operation, however deep.
        inner.tx_depth = 0;
        inner.overlay.clear();
        Ok(())
    }

    fn iter(&self, prefix: &[u8]) -> Result<Box<dyn KvsIter>> {
        let inner = self.inner.lock();
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = inner
            .map
            .range(prefix.to_vec()..)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if inner.in_tx() {
            for (key, staged) in inner.overlay.range(prefix.to_vec()..) {
                match staged {
                    Some(value) => {
                        merged.insert(key.clone(), value.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }
        Ok(Box::new(MemIter {
            entries: merged.into_iter().collect(),
            pos: 0,
        }))
    }
}

/// Snapshot cursor; the entries are fixed at creation time.
struct MemIter {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl KvsIter for MemIter {
    fn get(&self) -> Option<(&[u8], &[u8])> {
        self.entries
            .get(self.pos)
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    fn advance(&mut self) {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Arc<dyn KvsIndex> {
        let driver = MemKvsDriver::new();
        let fid = IndexFid::new(1, 2);
        driver.index_create(&fid).unwrap();
        driver.index_open(&fid).unwrap()
    }

    #[test]
    fn test_create_twice_fails() {
        let driver = MemKvsDriver::new();
        let fid = IndexFid::new(3, 0);
        driver.index_create(&fid).unwrap();
        assert_eq!(driver.index_create(&fid), Err(FsError::Exists));
    }

    #[test]
    fn test_open_absent_fails() {
        let driver = MemKvsDriver::new();
        assert!(driver.index_open(&IndexFid::new(9, 9)).is_err());
    }

    #[test]
    fn test_set_get_del() {
        let index = open();
        index.set(b"a", b"1").unwrap();
        assert_eq!(index.get(b"a").unwrap(), b"1");
        index.del(b"a").unwrap();
        assert_eq!(index.get(b"a"), Err(FsError::NotFound));
        assert_eq!(index.del(b"a"), Err(FsError::NotFound));
    }

    #[test]
    fn test_iter_is_ordered_and_positioned() {
        let index = open();
        for key in [&b"b/2"[..], b"a/1", b"b/1", b"c/1"] {
            index.set(key, b"v").unwrap();
        }
        let mut iter = index.iter(b"b/").unwrap();
        let mut seen = Vec::new();
        while let Some((k, _)) = iter.get() {
            seen.push(k.to_vec());
            iter.advance();
        }
        // Least key >= prefix first, then exact-next order; the caller
        // stops when the prefix no longer matches.
        assert_eq!(seen, vec![b"b/1".to_vec(), b"b/2".to_vec(), b"c/1".to_vec()]);
    }

    #[test]
    fn test_tx_reads_own_writes() {
        let index = open();
        index.begin_transaction().unwrap();
        index.set(b"k", b"v").unwrap();
        assert_eq!(index.get(b"k").unwrap(), b"v");
        index.end_transaction().unwrap();
        assert_eq!(index.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn test_nested_tx_commits_at_outermost() {
        let index = open();
        index.set(b"old", b"1").unwrap();
        index.begin_transaction().unwrap();
        index.begin_transaction().unwrap();
        index.set(b"new", b"2").unwrap();
        index.del(b"old").unwrap();
        index.end_transaction().unwrap();
        index.begin_transaction().unwrap();
        index.end_transaction().unwrap();
        // Outer transaction still open; overlay applies on its commit.
        index.end_transaction().unwrap();
        assert_eq!(index.get(b"new").unwrap(), b"2");
        assert_eq!(index.get(b"old"), Err(FsError::NotFound));
    }

    #[test]
    fn test_discard_drops_everything_staged() {
        let index = open();
        index.set(b"keep", b"1").unwrap();
        index.begin_transaction().unwrap();
        index.set(b"gone", b"2").unwrap();
        index.del(b"keep").unwrap();
        index.discard_transaction().unwrap();
        assert_eq!(index.get(b"keep").unwrap(), b"1");
        assert_eq!(index.get(b"gone"), Err(FsError::NotFound));
    }

    #[test]
    fn test_iter_sees_staged_overlay() {
        let index = open();
        index.set(b"p/a", b"1").unwrap();
        index.begin_transaction().unwrap();
        index.set(b"p/b", b"2").unwrap();
        index.del(b"p/a").unwrap();
        let mut iter = index.iter(b"p/").unwrap();
        let (k, _) = iter.get().unwrap();
        assert_eq!(k, b"p/b");
        iter.advance();
        assert!(iter.get().is_none());
        index.discard_transaction().unwrap();
    }
}
