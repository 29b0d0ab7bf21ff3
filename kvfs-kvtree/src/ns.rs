//! Namespace and endpoint records
//!
//! A namespace maps a filesystem name to a 16-bit fs id and the fid of
//! the KV index holding its tree. The records live in a dedicated meta
//! index with a well-known fid, so they survive restarts and can be
//! enumerated on boot. Endpoint (export) records are persisted alongside
//! them; their payload is an opaque JSON blob interpreted by the export
//! layer.

use std::sync::Arc;

use kvfs_api::{FsError, FsId, IndexFid, Result, Str256};
use kvfs_kvstore::{KvsDriver, KvsIndex};

use crate::key;

/// Fid of the meta index holding namespace records.
pub const NS_META_INDEX_FID: IndexFid = IndexFid::new(1, 1);
/// High half of every per-filesystem index fid.
const NS_TREE_FID_HI: u64 = 2;
/// First fs id handed out.
const NS_FIRST_FS_ID: FsId = 1;

/// One persisted namespace descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsInfo {
    pub name: Str256,
    pub id: FsId,
    pub fid: IndexFid,
}

impl NsInfo {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.wire_len() + 2 + IndexFid::WIRE_SIZE);
        self.name.encode(&mut out);
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.fid.to_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (name, used) = Str256::decode(bytes)?;
        let rest = &bytes[used..];
        if rest.len() != 2 + IndexFid::WIRE_SIZE {
            return Err(FsError::Invalid);
        }
        let id = FsId::from_le_bytes(rest[..2].try_into().unwrap());
        let fid = IndexFid::from_bytes(&rest[2..])?;
        Ok(Self { name, id, fid })
    }
}

/// Handle on the meta index; created once at boot.
pub struct NsStore {
    driver: Arc<dyn KvsDriver>,
    meta: Arc<dyn KvsIndex>,
}

impl NsStore {
    /// Opens the meta index, creating it on first boot.
    pub fn open(driver: Arc<dyn KvsDriver>) -> Result<Self> {
        let meta = match driver.index_open(&NS_META_INDEX_FID) {
            Ok(index) => index,
            Err(FsError::NotFound) => {
                driver.index_create(&NS_META_INDEX_FID)?;
                driver.index_open(&NS_META_INDEX_FID)?
            }
            Err(err) => return Err(err),
        };
        Ok(Self { driver, meta })
    }

    pub fn driver(&self) -> &Arc<dyn KvsDriver> {
        &self.driver
    }

    fn next_fs_id(&self) -> Result<FsId> {
        let id = match self.meta.get(&key::ns_counter_key()) {
            Ok(bytes) if bytes.len() == 2 => {
                FsId::from_le_bytes(bytes.try_into().unwrap())
            }
            Ok(_) => return Err(FsError::Invalid),
            Err(FsError::NotFound) => NS_FIRST_FS_ID,
            Err(err) => return Err(err),
        };
        self.meta
            .set(&key::ns_counter_key(), &(id + 1).to_le_bytes())?;
        Ok(id)
    }

    /// Allocates a namespace: a fresh fs id, a fresh index, and the
    /// persisted name/id records. `Exists` when the name is taken.
    pub fn ns_create(&self, name: &Str256) -> Result<NsInfo> {
        if self.meta.get(&key::ns_name_key(name)).is_ok() {
            return Err(FsError::Exists);
        }
        let id = self.next_fs_id()?;
        let fid = IndexFid::new(NS_TREE_FID_HI, id as u64);
        self.driver.index_create(&fid)?;

        let info = NsInfo {
            name: name.clone(),
            id,
            fid,
        };
        let bytes = info.to_bytes();
        self.meta.set(&key::ns_name_key(name), &bytes)?;
        self.meta.set(&key::ns_id_key(id), &bytes)?;
        log::info!("namespace '{}' created, fs_id={}", name, id);
        Ok(info)
    }

    /// Removes the namespace records and its tree index.
    pub fn ns_delete(&self, ns: &NsInfo) -> Result<()> {
        self.meta.del(&key::ns_name_key(&ns.name))?;
        self.meta.del(&key::ns_id_key(ns.id))?;
        self.driver.index_delete(&ns.fid)?;
        log::info!("namespace '{}' deleted", ns.name);
        Ok(())
    }

    /// Looks a namespace up by name.
    pub fn ns_get(&self, name: &Str256) -> Result<NsInfo> {
        NsInfo::from_bytes(&self.meta.get(&key::ns_name_key(name))?)
    }

    /// Enumerates persisted namespaces (boot-time replay).
    pub fn ns_scan<F>(&self, mut cb: F) -> Result<()>
    where
        F: FnMut(&NsInfo),
    {
        let prefix = key::ns_name_prefix();
        let mut iter = self.meta.iter(&prefix)?;
        while let Some((k, v)) = iter.get() {
            if !k.starts_with(&prefix) {
                break;
            }
            cb(&NsInfo::from_bytes(v)?);
            iter.advance();
        }
        Ok(())
    }

    /// Persists an endpoint blob for a namespace (opaque JSON).
    pub fn endpoint_set(&self, name: &Str256, blob: &[u8]) -> Result<()> {
        self.meta.set(&key::endpoint_key(name), blob)
    }

    pub fn endpoint_get(&self, name: &Str256) -> Result<Vec<u8>> {
        self.meta.get(&key::endpoint_key(name))
    }

    pub fn endpoint_delete(&self, name: &Str256) -> Result<()> {
        self.meta.del(&key::endpoint_key(name))
    }

    /// Enumerates persisted endpoints (boot-time replay).
    pub fn endpoint_scan<F>(&self, mut cb: F) -> Result<()>
    where
        F: FnMut(&Str256, &[u8]),
    {
        let prefix = key::endpoint_prefix();
        let mut iter = self.meta.iter(&prefix)?;
        while let Some((k, v)) = iter.get() {
            if !k.starts_with(&prefix) {
                break;
            }
            let (name, _) = Str256::decode(&k[prefix.len()..])?;
            cb(&name, v);
            iter.advance();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvfs_kvstore::MemKvsDriver;

    fn store() -> NsStore {
        NsStore::open(MemKvsDriver::new()).unwrap()
    }

    fn name(s: &str) -> Str256 {
        Str256::new(s).unwrap()
    }

    #[test]
    fn test_create_assigns_distinct_ids() {
        let store = store();
        let a = store.ns_create(&name("fs-a")).unwrap();
        let b = store.ns_create(&name("fs-b")).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.fid, b.fid);
    }

    #[test]
    fn test_create_duplicate_name_fails() {
        let store = store();
        store.ns_create(&name("fs")).unwrap();
        assert_eq!(store.ns_create(&name("fs")), Err(FsError::Exists));
    }

    #[test]
    fn test_scan_finds_created_namespaces() {
        let store = store();
        store.ns_create(&name("one")).unwrap();
        store.ns_create(&name("two")).unwrap();
        let mut seen = Vec::new();
        store.ns_scan(|ns| seen.push(ns.name.as_str().to_string())).unwrap();
        seen.sort();
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[test]
    fn test_delete_removes_records_and_index() {
        let store = store();
        let ns = store.ns_create(&name("gone")).unwrap();
        store.ns_delete(&ns).unwrap();
        assert!(store.ns_get(&name("gone")).is_err());
        assert!(store.driver().index_open(&ns.fid).is_err());
    }

    #[test]
    fn test_endpoint_records_round_trip() {
        let store = store();
        store.ns_create(&name("fs")).unwrap();
        store.endpoint_set(&name("fs"), b"{\"x\":1}").unwrap();
        assert_eq!(store.endpoint_get(&name("fs")).unwrap(), b"{\"x\":1}");
        let mut seen = 0;
        store
            .endpoint_scan(|n, blob| {
                assert_eq!(n.as_str(), "fs");
                assert_eq!(blob, b"{\"x\":1}");
                seen += 1;
            })
            .unwrap();
        assert_eq!(seen, 1);
        store.endpoint_delete(&name("fs")).unwrap();
        assert!(store.endpoint_get(&name("fs")).is_err());
    }
}
