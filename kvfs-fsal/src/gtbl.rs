//! Bucketed lookup tables for layout state
//!
//! A fixed-size chained hash table with one mutex per bucket, used for
//! pNFS-ish layout bookkeeping. Chains stay short at the designed load;
//! there is no rehash. Entries are matched by their full byte content.

use spin::Mutex;

use kvfs_api::{FsError, Result};

const BUCKET_COUNT: usize = 64;

#[derive(Default)]
struct Bucket {
    chain: Vec<Elem>,
}

struct Elem {
    bytes: Vec<u8>,
}

/// One global table; the FSAL module owns one per state kind.
pub struct Gtbl {
    buckets: Vec<Mutex<Bucket>>,
}

impl Default for Gtbl {
    fn default() -> Self {
        Self::new()
    }
}

impl Gtbl {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        for _ in 0..BUCKET_COUNT {
            buckets.push(Mutex::new(Bucket::default()));
        }
        Self { buckets }
    }

    fn bucket(&self, key: u64) -> &Mutex<Bucket> {
        &self.buckets[(key % BUCKET_COUNT as u64) as usize]
    }

    /// Inserts an element under `key`. `Exists` when an identical
    /// element is already chained.
    pub fn add(&self, bytes: Vec<u8>, key: u64) -> Result<()> {
        let mut bucket = self.bucket(key).lock();
        if bucket.chain.iter().any(|e| e.bytes == bytes) {
            return Err(FsError::Exists);
        }
        bucket.chain.push(Elem { bytes });
        Ok(())
    }

    /// Finds an element equal to `bytes` under `key`.
    pub fn find(&self, bytes: &[u8], key: u64) -> Option<Vec<u8>> {
        let bucket = self.bucket(key).lock();
        bucket
            .chain
            .iter()
            .find(|e| e.bytes == bytes)
            .map(|e| e.bytes.clone())
    }

    /// Removes and returns an element equal to `bytes` under `key`.
    pub fn remove(&self, bytes: &[u8], key: u64) -> Option<Vec<u8>> {
        let mut bucket = self.bucket(key).lock();
        let pos = bucket.chain.iter().position(|e| e.bytes == bytes)?;
        Some(bucket.chain.swap_remove(pos).bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_find_remove() {
        let tbl = Gtbl::new();
        tbl.add(b"layout-1".to_vec(), 7).unwrap();
        assert_eq!(tbl.find(b"layout-1", 7), Some(b"layout-1".to_vec()));
        assert_eq!(tbl.remove(b"layout-1", 7), Some(b"layout-1".to_vec()));
        assert_eq!(tbl.find(b"layout-1", 7), None);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let tbl = Gtbl::new();
        tbl.add(b"x".to_vec(), 1).unwrap();
        assert_eq!(tbl.add(b"x".to_vec(), 1), Err(FsError::Exists));
    }

    #[test]
    fn test_same_bucket_different_content() {
        let tbl = Gtbl::new();
        // Same bucket (keys congruent mod 64), different payloads.
        tbl.add(b"a".to_vec(), 0).unwrap();
        tbl.add(b"b".to_vec(), 64).unwrap();
        assert!(tbl.find(b"a", 0).is_some());
        assert!(tbl.find(b"b", 64).is_some());
        assert!(tbl.find(b"c", 0).is_none());
        tbl.remove(b"a", 0).unwrap();
        assert!(tbl.find(b"b", 64).is_some());
    }
}
