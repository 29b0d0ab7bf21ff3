//! Shared fixtures for the KVFS scenario tests
//!
//! Builds a complete in-memory stack (KV driver, data store, registry,
//! one filesystem, one export) and offers the handful of helpers the
//! suites keep reaching for.

use std::sync::Arc;

use kvfs_api::{Cred, Result, Stat};
use kvfs_core::{CfsFs, CfsRegistry, ROOT_INO};
use kvfs_dstore::{Dstore, DstoreConfig};
use kvfs_fsal::{CreateMode, FsalExport, FsalObj, FsalState, OpenFlags, StateType};
use kvfs_kvstore::MemKvsDriver;

pub struct TestFs {
    pub registry: CfsRegistry,
    pub fs: Arc<CfsFs>,
    pub export: FsalExport,
}

impl TestFs {
    /// A fresh filesystem on in-memory backends.
    pub fn new() -> Self {
        Self::with_dstore_config(DstoreConfig::mem())
    }

    /// A fresh filesystem whose objects live in the given data store.
    pub fn with_dstore_config(cfg: DstoreConfig) -> Self {
        let driver = MemKvsDriver::new();
        let dstore = Dstore::init(cfg).expect("dstore init");
        let registry = CfsRegistry::new(driver, dstore).expect("registry init");
        registry.fs_create("vol0").expect("fs create");
        let fs = registry.fs_open("vol0").expect("fs open");
        let export = FsalExport::new(fs.clone());
        Self {
            registry,
            fs,
            export,
        }
    }

    pub fn cred(&self) -> Cred {
        Cred::root()
    }

    pub fn root_ino(&self) -> u64 {
        ROOT_INO
    }

    /// Root object handle of the export.
    pub fn root_obj(&self) -> Arc<FsalObj> {
        self.export.getroot(&self.cred()).expect("getroot")
    }

    /// Creates-and-opens a file under the root through `open2`.
    pub fn open2_create(
        &self,
        name: &str,
        flags: OpenFlags,
    ) -> (Arc<FsalObj>, Arc<FsalState>) {
        let state = self.export.alloc_state(StateType::Share);
        let obj = self
            .export
            .open2(
                &self.cred(),
                &self.root_obj(),
                &state,
                flags,
                CreateMode::Unchecked,
                Some(name),
                None,
                None,
            )
            .expect("open2 create")
            .expect("created object");
        (obj, state)
    }

    /// Opens an existing file by name through `open2`.
    pub fn open2_by_name(
        &self,
        name: &str,
        flags: OpenFlags,
    ) -> Result<(Arc<FsalObj>, Arc<FsalState>)> {
        let state = self.export.alloc_state(StateType::Share);
        let obj = self.export.open2(
            &self.cred(),
            &self.root_obj(),
            &state,
            flags,
            CreateMode::NoCreate,
            Some(name),
            None,
            None,
        )?;
        Ok((obj.expect("by-name object"), state))
    }

    /// Stat of an inode, unwrapped.
    pub fn stat_of(&self, ino: u64) -> Stat {
        self.fs.getattr(&self.cred(), ino).expect("getattr")
    }
}

impl Default for TestFs {
    fn default() -> Self {
        Self::new()
    }
}
