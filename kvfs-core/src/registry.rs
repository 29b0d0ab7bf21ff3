//! Filesystem registry and lifecycle
//!
//! Tracks every filesystem known to the process: the persisted namespace
//! records are replayed into an in-memory list at boot, and endpoint
//! (export) bindings are attached to their filesystems. Creation builds
//! the namespace, the tree root and the inode counter; deletion refuses
//! exported or non-empty filesystems.

use std::sync::Arc;

use spin::Mutex;

use kvfs_api::{FsError, Result, Str256};
use kvfs_dstore::Dstore;
use kvfs_kvstore::KvsDriver;
use kvfs_kvtree::{KvTree, NsInfo, NsStore};

use crate::CfsFs;

struct FsEntry {
    ns: NsInfo,
    endpoint: Option<Vec<u8>>,
}

/// Process-wide list of filesystems.
pub struct CfsRegistry {
    ns_store: NsStore,
    dstore: Arc<Dstore>,
    entries: Mutex<Vec<FsEntry>>,
}

impl CfsRegistry {
    /// Opens the namespace meta index and replays persisted namespaces
    /// and endpoints.
    pub fn new(kvs: Arc<dyn KvsDriver>, dstore: Arc<Dstore>) -> Result<Self> {
        let ns_store = NsStore::open(kvs)?;
        let mut entries = Vec::new();
        ns_store.ns_scan(|ns| {
            entries.push(FsEntry {
                ns: ns.clone(),
                endpoint: None,
            });
        })?;
        let registry = Self {
            ns_store,
            dstore,
            entries: Mutex::new(entries),
        };
        registry.ns_store.endpoint_scan(|name, blob| {
            let mut entries = registry.entries.lock();
            match entries.iter_mut().find(|e| &e.ns.name == name) {
                Some(entry) => entry.endpoint = Some(blob.to_vec()),
                // The two lists are persisted together; a dangling
                // endpoint means somebody edited the store behind us.
                None => log::error!("endpoint '{}' has no filesystem", name),
            }
        })?;
        Ok(registry)
    }

    pub fn dstore(&self) -> &Arc<Dstore> {
        &self.dstore
    }

    fn find_ns(&self, name: &Str256) -> Option<NsInfo> {
        self.entries
            .lock()
            .iter()
            .find(|e| &e.ns.name == name)
            .map(|e| e.ns.clone())
    }

    /// Whether a filesystem with this name exists.
    pub fn fs_lookup(&self, name: &str) -> Result<NsInfo> {
        let name = Str256::new(name)?;
        self.find_ns(&name).ok_or(FsError::NotFound)
    }

    /// Creates a filesystem: namespace, tree root and inode counter.
    pub fn fs_create(&self, name: &str) -> Result<()> {
        let name = Str256::new(name)?;
        if self.find_ns(&name).is_some() {
            log::error!("filesystem '{}' already exists", name);
            return Err(FsError::Exists);
        }

        let ns = self.ns_store.ns_create(&name)?;
        let root_stat = CfsFs::root_stat();
        let tree = KvTree::create(self.ns_store.driver().as_ref(), &ns, &root_stat.to_bytes())?;
        let fs = CfsFs::new(ns.clone(), tree, self.dstore.clone());
        fs.ino_gen_init()?;

        self.entries.lock().push(FsEntry { ns, endpoint: None });
        log::info!("filesystem '{}' created", name);
        Ok(())
    }

    /// Deletes a filesystem that is empty and not exported.
    pub fn fs_delete(&self, name: &str) -> Result<()> {
        let name = Str256::new(name)?;
        let entry_ns = {
            let entries = self.entries.lock();
            let entry = entries
                .iter()
                .find(|e| e.ns.name == name)
                .ok_or(FsError::NotFound)?;
            if entry.endpoint.is_some() {
                log::error!("cannot delete exported filesystem '{}'", name);
                return Err(FsError::Invalid);
            }
            entry.ns.clone()
        };

        let tree = KvTree::init(self.ns_store.driver().as_ref(), &entry_ns)?;
        let fs = CfsFs::new(entry_ns.clone(), tree, self.dstore.clone());
        if fs.tree().has_children(fs.tree().root_id())? {
            log::error!("cannot delete non-empty filesystem '{}'", name);
            return Err(FsError::NotEmpty);
        }
        fs.ino_gen_fini()?;

        let tree = KvTree::init(self.ns_store.driver().as_ref(), &entry_ns)?;
        tree.delete()?;
        self.ns_store.ns_delete(&entry_ns)?;

        self.entries.lock().retain(|e| e.ns.name != name);
        log::info!("filesystem '{}' deleted", name);
        Ok(())
    }

    /// Opens a filesystem for operation.
    pub fn fs_open(&self, name: &str) -> Result<Arc<CfsFs>> {
        let ns = self.fs_lookup(name)?;
        let tree = KvTree::init(self.ns_store.driver().as_ref(), &ns)?;
        Ok(Arc::new(CfsFs::new(ns, tree, self.dstore.clone())))
    }

    /// Closes an open filesystem handle.
    pub fn fs_close(&self, fs: Arc<CfsFs>) {
        drop(fs);
    }

    /// Enumerates filesystems with their endpoint blobs.
    pub fn fs_scan<F>(&self, mut cb: F)
    where
        F: FnMut(&NsInfo, Option<&[u8]>),
    {
        for entry in self.entries.lock().iter() {
            cb(&entry.ns, entry.endpoint.as_deref());
        }
    }

    /// Binds an endpoint blob to a filesystem. One endpoint per
    /// filesystem.
    pub fn endpoint_create(&self, name: &str, blob: &[u8]) -> Result<()> {
        let name = Str256::new(name)?;
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.ns.name == name)
            .ok_or(FsError::NotFound)?;
        if entry.endpoint.is_some() {
            log::error!("filesystem '{}' already exported", name);
            return Err(FsError::Exists);
        }
        self.ns_store.endpoint_set(&name, blob)?;
        entry.endpoint = Some(blob.to_vec());
        log::info!("endpoint created for '{}'", name);
        Ok(())
    }

    /// Removes a filesystem's endpoint binding.
    pub fn endpoint_delete(&self, name: &str) -> Result<()> {
        let name = Str256::new(name)?;
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.ns.name == name)
            .ok_or(FsError::NotFound)?;
        if entry.endpoint.is_none() {
            return Err(FsError::NotFound);
        }
        self.ns_store.endpoint_delete(&name)?;
        entry.endpoint = None;
        log::info!("endpoint deleted for '{}'", name);
        Ok(())
    }

    /// Enumerates exported filesystems only.
    pub fn endpoint_scan<F>(&self, mut cb: F)
    where
        F: FnMut(&NsInfo, &[u8]),
    {
        for entry in self.entries.lock().iter() {
            if let Some(blob) = &entry.endpoint {
                cb(&entry.ns, blob);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvfs_api::Cred;
    use kvfs_dstore::DstoreConfig;
    use kvfs_kvstore::MemKvsDriver;

    fn registry() -> CfsRegistry {
        let kvs = MemKvsDriver::new();
        let ds = Dstore::init(DstoreConfig::mem()).unwrap();
        CfsRegistry::new(kvs, ds).unwrap()
    }

    #[test]
    fn test_create_open_delete_cycle() {
        let reg = registry();
        reg.fs_create("vol0").unwrap();
        assert_eq!(reg.fs_create("vol0"), Err(FsError::Exists));

        let fs = reg.fs_open("vol0").unwrap();
        let stat = fs.getattr(&Cred::root(), crate::ROOT_INO).unwrap();
        assert!(stat.is_dir());
        assert_eq!(stat.nlink, 2);
        reg.fs_close(fs);

        reg.fs_delete("vol0").unwrap();
        assert!(reg.fs_lookup("vol0").is_err());
    }

    #[test]
    fn test_delete_refuses_non_empty() {
        let reg = registry();
        reg.fs_create("vol").unwrap();
        let fs = reg.fs_open("vol").unwrap();
        fs.mkdir(&Cred::root(), crate::ROOT_INO, "d", 0o755).unwrap();
        assert_eq!(reg.fs_delete("vol"), Err(FsError::NotEmpty));
        fs.rmdir(&Cred::root(), crate::ROOT_INO, "d").unwrap();
        reg.fs_close(fs);
        reg.fs_delete("vol").unwrap();
    }

    #[test]
    fn test_delete_refuses_exported() {
        let reg = registry();
        reg.fs_create("vol").unwrap();
        reg.endpoint_create("vol", b"{}").unwrap();
        assert_eq!(reg.fs_delete("vol"), Err(FsError::Invalid));
        reg.endpoint_delete("vol").unwrap();
        reg.fs_delete("vol").unwrap();
    }

    #[test]
    fn test_endpoint_binding_rules() {
        let reg = registry();
        assert_eq!(reg.endpoint_create("nope", b"{}"), Err(FsError::NotFound));
        reg.fs_create("vol").unwrap();
        reg.endpoint_create("vol", b"{\"a\":1}").unwrap();
        assert_eq!(reg.endpoint_create("vol", b"{}"), Err(FsError::Exists));

        let mut seen = 0;
        reg.endpoint_scan(|ns, blob| {
            assert_eq!(ns.name.as_str(), "vol");
            assert_eq!(blob, b"{\"a\":1}");
            seen += 1;
        });
        assert_eq!(seen, 1);
    }
}
