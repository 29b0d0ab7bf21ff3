//! Data-store abstraction layer (DSAL)
//!
//! File contents live in an object store reached through a backend trait:
//! - object lifecycle: create, delete, open, close, resize
//! - a monotonic generator for fresh object ids
//! - block-aligned reads and writes, driven either synchronously or
//!   through the submit/wait IO-operation state machine
//!
//! Two backends ship here: an in-memory store for tests and a
//! file-per-object POSIX store. Backends only ever see block-aligned
//! extents; the filesystem data path performs read-modify-write around
//! unaligned bounds.
//!
//! There is exactly one `Dstore` per process; it is constructed during
//! startup and passed by reference, never reached through a global.

pub mod bufvec;
pub mod io_op;
pub mod mem;
pub mod posix;

use std::cell::Cell;
use std::path::PathBuf;
use std::sync::Arc;

use kvfs_api::{FsError, ObjId, Result};

pub use bufvec::{IoBuffer, IoVec};
pub use io_op::{IoOp, IoOpType};

/// Default block size a backend insists on.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Which concrete object backend to run on.
#[derive(Debug, Clone)]
pub enum BackendKind {
    /// In-memory objects; contents die with the process.
    Mem,
    /// One file per object under a root directory.
    Posix { root: PathBuf },
}

/// Data-store configuration, fixed at init time.
#[derive(Debug, Clone)]
pub struct DstoreConfig {
    pub backend: BackendKind,
    /// Backend block size; must be a power of two.
    pub block_size: usize,
    /// Discriminator mixed into generated object ids.
    pub instance: u64,
}

impl DstoreConfig {
    pub fn mem() -> Self {
        Self {
            backend: BackendKind::Mem,
            block_size: DEFAULT_BLOCK_SIZE,
            instance: 1,
        }
    }

    pub fn posix(root: PathBuf) -> Self {
        Self {
            backend: BackendKind::Posix { root },
            block_size: DEFAULT_BLOCK_SIZE,
            instance: 1,
        }
    }
}

/// Backend capability set; one implementation per store type.
pub trait DstoreBackend: Send + Sync {
    /// Generates a fresh object id; ids are monotonic per instance.
    fn new_oid(&self) -> Result<ObjId>;

    /// Creates an empty object. `Exists` if the id is already in use.
    fn obj_create(&self, oid: &ObjId) -> Result<()>;

    /// Deletes an object and its contents. `NotFound` when absent.
    fn obj_delete(&self, oid: &ObjId) -> Result<()>;

    /// Opens an existing object; `NotFound` when a delete won the race.
    fn obj_open(&self, oid: &ObjId) -> Result<Arc<dyn DstoreObj>>;

    /// Called once per worker thread before its first IO; idempotent.
    fn adopt_thread(&self) {}

    fn fini(&self) {}
}

/// An object in open state. Offsets and lengths handed to the block IO
/// calls are multiples of the store block size.
pub trait DstoreObj: Send + Sync {
    fn oid(&self) -> &ObjId;

    /// Reads full blocks at `offset` into `buf`; regions past the written
    /// length read as zeros.
    fn read_blocks(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes full blocks at `offset`.
    fn write_blocks(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Logical length of the stored data.
    fn len(&self) -> Result<u64>;

    /// Shrinks the object to `new_size` bytes, deallocating the tail.
    fn truncate(&self, new_size: u64) -> Result<()>;
}

thread_local! {
    static THREAD_ADOPTED: Cell<bool> = const { Cell::new(false) };
}

/// Process-scoped data-store instance.
pub struct Dstore {
    backend: Arc<dyn DstoreBackend>,
    block_size: usize,
}

impl Dstore {
    /// Builds the backend selected by `cfg`. Init happens exactly once
    /// per process; the returned handle is shared by reference.
    pub fn init(cfg: DstoreConfig) -> Result<Arc<Self>> {
        if !cfg.block_size.is_power_of_two() || cfg.block_size == 0 {
            return Err(FsError::Invalid);
        }
        let backend: Arc<dyn DstoreBackend> = match &cfg.backend {
            BackendKind::Mem => Arc::new(mem::MemDstoreBackend::new(cfg.instance, cfg.block_size)),
            BackendKind::Posix { root } => Arc::new(posix::PosixDstoreBackend::new(
                root.clone(),
                cfg.instance,
                cfg.block_size,
            )?),
        };
        log::debug!("dstore init: block_size={}", cfg.block_size);
        Ok(Arc::new(Self {
            backend,
            block_size: cfg.block_size,
        }))
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Adopts the calling thread into the backend on first use.
    fn adopt_current_thread(&self) {
        THREAD_ADOPTED.with(|adopted| {
            if !adopted.get() {
                self.backend.adopt_thread();
                adopted.set(true);
            }
        });
    }

    pub fn new_oid(&self) -> Result<ObjId> {
        self.adopt_current_thread();
        self.backend.new_oid()
    }

    pub fn obj_create(&self, oid: &ObjId) -> Result<()> {
        self.adopt_current_thread();
        self.backend.obj_create(oid)
    }

    pub fn obj_delete(&self, oid: &ObjId) -> Result<()> {
        self.adopt_current_thread();
        let rc = self.backend.obj_delete(oid);
        if rc == Err(FsError::NotFound) {
            log::warn!("delete of non-existing object {}", oid);
        }
        rc
    }

    pub fn obj_open(&self, oid: &ObjId) -> Result<Arc<dyn DstoreObj>> {
        self.adopt_current_thread();
        self.backend.obj_open(oid)
    }

    /// Resizes an object: shrinking deallocates, growth is a logical
    /// hole (subsequent reads return zeros), equal sizes are a no-op.
    pub fn obj_resize(&self, oid: &ObjId, old_size: u64, new_size: u64) -> Result<()> {
        self.adopt_current_thread();
        if old_size == new_size {
            return Ok(());
        }
        if old_size < new_size {
            log::debug!("hole punch {}: {} -> {}", oid, old_size, new_size);
            return Ok(());
        }
        let obj = self.backend.obj_open(oid)?;
        obj.truncate(new_size)
    }
}

impl Drop for Dstore {
    fn drop(&mut self) {
        self.backend.fini();
    }
}
