//! Share reservations and open-state lifecycle
//!
//! Every open file handle owns a share-counter table enforcing NFSv4
//! open/deny semantics, and every open is represented by a state object
//! that moves `CLOSED -> OPEN(flags) -> CLOSED`. Byte-range lock states
//! borrow the file descriptor of their owning open state. The `open2`
//! family implements the NFSv4 create modes; closing the last share of
//! an unlinked file destroys it.
//!
//! The per-object reader-writer lock serializes data-path IO against the
//! object's stat (writers exclusive) and protects the share counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bitflags::bitflags;
use hashbrown::HashMap;
use spin::Mutex;

use kvfs_api::{Cred, FsError, Result, Stat, StatFlags, Timespec};
use kvfs_core::{CfsFs, RenameFlags};

use crate::handle::FileHandle;

/// Cookie of the first user-visible directory entry; the first three
/// are reserved, consistent with the "." and ".." convention.
pub const FIRST_COOKIE: u64 = 3;

bitflags! {
    /// Open and deny modes of one open state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u16 {
        const READ       = 0x01;
        const WRITE      = 0x02;
        const TRUNC      = 0x04;
        const DENY_READ  = 0x08;
        const DENY_WRITE = 0x10;
    }
}

impl OpenFlags {
    /// The closed state carries no flags.
    pub const fn closed() -> Self {
        Self::empty()
    }
}

/// An inode number never handed out; marks a closed file descriptor.
const INVALID_INO: u64 = 0;

/// Share-reservation counters of one file handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShareCounters {
    readers: u32,
    writers: u32,
    deny_readers: u32,
    deny_writers: u32,
}

impl ShareCounters {
    /// Whether a new open with `flags` collides with the current state.
    fn conflicts(&self, flags: OpenFlags) -> bool {
        (flags.contains(OpenFlags::READ) && self.deny_readers > 0)
            || (flags.contains(OpenFlags::WRITE) && self.deny_writers > 0)
            || (flags.contains(OpenFlags::DENY_READ) && self.readers > 0)
            || (flags.contains(OpenFlags::DENY_WRITE) && self.writers > 0)
    }

    /// Moves the counters from `old` to `new`.
    fn update(&mut self, old: OpenFlags, new: OpenFlags) {
        let dec = |count: &mut u32| {
            debug_assert!(*count > 0);
            *count -= 1;
        };
        if old.contains(OpenFlags::READ) {
            dec(&mut self.readers);
        }
        if old.contains(OpenFlags::WRITE) {
            dec(&mut self.writers);
        }
        if old.contains(OpenFlags::DENY_READ) {
            dec(&mut self.deny_readers);
        }
        if old.contains(OpenFlags::DENY_WRITE) {
            dec(&mut self.deny_writers);
        }
        if new.contains(OpenFlags::READ) {
            self.readers += 1;
        }
        if new.contains(OpenFlags::WRITE) {
            self.writers += 1;
        }
        if new.contains(OpenFlags::DENY_READ) {
            self.deny_readers += 1;
        }
        if new.contains(OpenFlags::DENY_WRITE) {
            self.deny_writers += 1;
        }
    }

    fn any_open(&self) -> bool {
        self.readers > 0 || self.writers > 0 || self.deny_readers > 0 || self.deny_writers > 0
    }
}

/// One object handle held by the host (MD-cache entry).
pub struct FsalObj {
    fs: Arc<CfsFs>,
    ino: u64,
    fh: Mutex<FileHandle>,
    /// FH-level lock: share counters, and stat serialization for the
    /// data path (writers exclusive).
    lock: RwLock<ShareCounters>,
}

impl FsalObj {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn fs(&self) -> &Arc<CfsFs> {
        &self.fs
    }

    /// Snapshot of the wire handle.
    pub fn file_handle(&self) -> FileHandle {
        self.fh.lock().clone()
    }

    /// Whether any share state is active on this handle.
    pub fn is_open(&self) -> bool {
        self.lock.read().unwrap().any_open()
    }

    /// Applies new open flags if they do not conflict with the current
    /// share state.
    fn share_try_new_state(&self, old: OpenFlags, new: OpenFlags) -> Result<()> {
        let mut share = self.lock.write().unwrap();
        if share.conflicts(new) {
            return Err(FsError::PermissionDenied);
        }
        share.update(old, new);
        Ok(())
    }

    /// Unconditionally commits a counter transition (unwind path).
    fn share_set_new_state(&self, old: OpenFlags, new: OpenFlags) {
        self.lock.write().unwrap().update(old, new);
    }
}

/// The file descriptor carried by an open state.
#[derive(Debug, Clone, Copy)]
pub struct FileState {
    pub openflags: OpenFlags,
    pub ino: u64,
}

impl FileState {
    fn closed() -> Self {
        Self {
            openflags: OpenFlags::closed(),
            ino: INVALID_INO,
        }
    }

    fn invariant_closed(&self) -> bool {
        self.openflags.is_empty() && self.ino == INVALID_INO
    }

    fn invariant_open(&self) -> bool {
        !self.openflags.is_empty() && self.ino != INVALID_INO
    }
}

/// Kind of state object the host allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateType {
    /// An actual open file.
    Share,
    /// A byte-range lock, borrowing the fd of its open state.
    Lock { open_state: u64 },
    /// A delegation, holding an internal open.
    Deleg,
}

/// One allocated state: a typed wrapper around a file descriptor.
pub struct FsalState {
    id: u64,
    ty: StateType,
    fd: Mutex<FileState>,
}

impl FsalState {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state_type(&self) -> StateType {
        self.ty
    }
}

/// Delegation kinds handed down by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegKind {
    None,
    Read,
    Write,
}

/// NFSv4 create disposition of `open2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    NoCreate,
    Unchecked,
    /// Existence was already enforced above; same behavior as Unchecked.
    Guarded,
    Exclusive,
}

/// Exclusive-create verifier, stored in atime+mtime of the new file.
pub type Verifier = [u8; 8];

fn verifier_times(verifier: &Verifier) -> (Timespec, Timespec) {
    let atime = u32::from_le_bytes(verifier[..4].try_into().unwrap());
    let mtime = u32::from_le_bytes(verifier[4..].try_into().unwrap());
    (
        Timespec::new(atime as i64, 0),
        Timespec::new(mtime as i64, 0),
    )
}

/// One export: an open filesystem plus its object and state tables.
pub struct FsalExport {
    fs: Arc<CfsFs>,
    objs: Mutex<HashMap<u64, Arc<FsalObj>>>,
    states: Mutex<HashMap<u64, Arc<FsalState>>>,
    next_state_id: AtomicU64,
    /// pNFS-ish layout bookkeeping.
    layouts: crate::gtbl::Gtbl,
}

impl FsalExport {
    pub fn new(fs: Arc<CfsFs>) -> Self {
        Self {
            fs,
            objs: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            next_state_id: AtomicU64::new(1),
            layouts: crate::gtbl::Gtbl::new(),
        }
    }

    pub fn fs(&self) -> &Arc<CfsFs> {
        &self.fs
    }

    /// The layout-state table of this export.
    pub fn layouts(&self) -> &crate::gtbl::Gtbl {
        &self.layouts
    }

    /// Returns the cached object handle for `ino`, constructing it on
    /// first sight.
    pub fn obj_from_ino(&self, cred: &Cred, ino: u64) -> Result<Arc<FsalObj>> {
        if let Some(obj) = self.objs.lock().get(&ino) {
            return Ok(obj.clone());
        }
        let fh = FileHandle::from_ino(&self.fs, cred, ino)?;
        let obj = Arc::new(FsalObj {
            fs: self.fs.clone(),
            ino,
            fh: Mutex::new(fh),
            lock: RwLock::new(ShareCounters::default()),
        });
        self.objs.lock().insert(ino, obj.clone());
        Ok(obj)
    }

    /// Object handle of the export root.
    pub fn getroot(&self, cred: &Cred) -> Result<Arc<FsalObj>> {
        self.obj_from_ino(cred, kvfs_core::ROOT_INO)
    }

    /// Resolves a child by name.
    pub fn lookup(&self, cred: &Cred, parent: &Arc<FsalObj>, name: &str) -> Result<Arc<FsalObj>> {
        let ino = self.fs.lookup(cred, parent.ino(), name)?;
        self.obj_from_ino(cred, ino)
    }

    /// Allocates a state object with a closed file descriptor.
    pub fn alloc_state(&self, ty: StateType) -> Arc<FsalState> {
        let id = self.next_state_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(FsalState {
            id,
            ty,
            fd: Mutex::new(FileState::closed()),
        });
        self.states.lock().insert(id, state.clone());
        state
    }

    /// Releases a state object.
    pub fn free_state(&self, state: &Arc<FsalState>) {
        self.states.lock().remove(&state.id);
    }

    /// Finds the file descriptor to use for an IO call arriving with
    /// `state`. Lock states redirect to their owning open state; only
    /// share, lock and delegation states can carry IO.
    pub fn find_fd(
        &self,
        state: &Arc<FsalState>,
        bypass: bool,
        wanted: OpenFlags,
    ) -> Result<FileState> {
        // Special (bypass) state ids are not supported.
        debug_assert!(!bypass);

        let fd = match state.ty {
            StateType::Lock { open_state } => {
                let open = self
                    .states
                    .lock()
                    .get(&open_state)
                    .cloned()
                    .ok_or(FsError::Invalid)?;
                *open.fd.lock()
            }
            StateType::Share | StateType::Deleg => *state.fd.lock(),
        };

        let rw_wanted = wanted & (OpenFlags::READ | OpenFlags::WRITE);
        if fd.openflags.contains(rw_wanted) {
            return Ok(fd);
        }

        log::error!(
            "no usable fd: state {} open for {:?}, wanted {:?}",
            state.id,
            fd.openflags,
            wanted
        );
        Err(FsError::Invalid)
    }

    /// Opens (or re-opens) a file descriptor through the share table.
    fn file_state_open(
        &self,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
        is_reopen: bool,
    ) -> Result<()> {
        let mut fd = state.fd.lock();
        if !is_reopen {
            debug_assert!(fd.invariant_closed());
        }

        obj.share_try_new_state(fd.openflags, openflags)?;

        fd.openflags = openflags;
        fd.ino = obj.ino();
        debug_assert!(fd.invariant_open());
        Ok(())
    }

    /// Closes the file descriptor of a state.
    fn file_state_close(&self, obj: &Arc<FsalObj>, state: &Arc<FsalState>) -> Result<()> {
        let mut fd = state.fd.lock();
        debug_assert!(fd.invariant_open());

        obj.share_set_new_state(fd.openflags, OpenFlags::closed());
        *fd = FileState::closed();
        debug_assert!(fd.invariant_closed());
        Ok(())
    }

    fn open2_by_handle(
        &self,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
    ) -> Result<()> {
        self.file_state_open(obj, state, openflags, false)
    }

    fn open2_by_name(
        &self,
        cred: &Cred,
        parent: &Arc<FsalObj>,
        name: &str,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
    ) -> Result<Arc<FsalObj>> {
        let obj = self.lookup(cred, parent, name)?;
        self.open2_by_handle(&obj, state, openflags)?;
        Ok(obj)
    }

    /// OPEN4 + UNCHECKED4 on an existing file: open, then truncate when
    /// requested.
    fn open_unchecked(
        &self,
        cred: &Cred,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
    ) -> Result<()> {
        self.open2_by_handle(obj, state, openflags)?;

        if openflags.contains(OpenFlags::TRUNC) {
            let mut stat = Stat::default();
            stat.set_size(0);
            if let Err(err) = self.ftruncate2(cred, obj, state, &stat, StatFlags::SIZE_SET) {
                let _ = self.close2(obj, state);
                return Err(err);
            }
        }
        Ok(())
    }

    /// OPEN4 + UNCHECKED4 when the file does not exist yet.
    fn create_unchecked(
        &self,
        cred: &Cred,
        parent: &Arc<FsalObj>,
        name: &str,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
        attrs_in: Option<(&Stat, StatFlags)>,
    ) -> Result<Arc<FsalObj>> {
        let (stat_in, flags, mode) = match attrs_in {
            Some((stat, flags)) => (*stat, flags & !StatFlags::MODE_SET, stat.mode & 0o7777),
            None => (Stat::default(), StatFlags::empty(), 0o644),
        };

        let (ino, _stat) =
            self.fs
                .creat_ex(cred, parent.ino(), name, mode, &stat_in, flags)?;
        let obj = self.obj_from_ino(cred, ino)?;
        self.open2_by_handle(&obj, state, openflags)?;
        Ok(obj)
    }

    /// OPEN4 + EXCLUSIVE4 create: the verifier becomes the initial
    /// atime/mtime.
    fn create_exclusive(
        &self,
        cred: &Cred,
        parent: &Arc<FsalObj>,
        name: &str,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
        attrs_in: Option<(&Stat, StatFlags)>,
        verifier: &Verifier,
    ) -> Result<Arc<FsalObj>> {
        // Create operations do not carry the truncate flag.
        debug_assert!(!openflags.contains(OpenFlags::TRUNC));

        let mode = match attrs_in {
            Some((stat, flags)) if flags.contains(StatFlags::MODE_SET) => stat.mode & 0o7777,
            _ => 0o644,
        };

        let (atime, mtime) = verifier_times(verifier);
        let stat_in = Stat {
            atime,
            mtime,
            ..Stat::default()
        };
        let flags = StatFlags::ATIME_SET | StatFlags::MTIME_SET;

        let (ino, _stat) = self.fs.creat_ex(cred, parent.ino(), name, mode, &stat_in, flags)?;
        let obj = self.obj_from_ino(cred, ino)?;
        self.open2_by_handle(&obj, state, openflags)?;
        Ok(obj)
    }

    /// OPEN4 + EXCLUSIVE4 retransmission: the file exists and must match
    /// the verifier stored in its times.
    fn open_exclusive(
        &self,
        cred: &Cred,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
        verifier: &Verifier,
    ) -> Result<()> {
        debug_assert!(!openflags.contains(OpenFlags::TRUNC));

        let stat = self.fs.getattr(cred, obj.ino())?;
        let (atime, mtime) = verifier_times(verifier);
        if stat.atime.sec != atime.sec || stat.mtime.sec != mtime.sec {
            return Err(FsError::Exists);
        }
        self.open2_by_handle(obj, state, openflags)
    }

    /// The NFSv4-shaped open: dispatches on create mode and the
    /// presence of a name. Returns the newly referenced object for
    /// by-name and create flavors.
    pub fn open2(
        &self,
        cred: &Cred,
        obj_hdl: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
        createmode: CreateMode,
        name: Option<&str>,
        attrs_in: Option<(&Stat, StatFlags)>,
        verifier: Option<Verifier>,
    ) -> Result<Option<Arc<FsalObj>>> {
        log::trace!(
            "open2 ino={} flags={:?} mode={:?} name={:?}",
            obj_hdl.ino(),
            openflags,
            createmode,
            name
        );
        match createmode {
            CreateMode::NoCreate => match name {
                None => {
                    self.open2_by_handle(obj_hdl, state, openflags)?;
                    Ok(None)
                }
                Some(name) => Ok(Some(self.open2_by_name(
                    cred, obj_hdl, name, state, openflags,
                )?)),
            },
            CreateMode::Unchecked | CreateMode::Guarded => match name {
                Some(name) => Ok(Some(self.create_unchecked(
                    cred, obj_hdl, name, state, openflags, attrs_in,
                )?)),
                None => {
                    self.open_unchecked(cred, obj_hdl, state, openflags)?;
                    Ok(None)
                }
            },
            CreateMode::Exclusive => {
                let verifier = verifier.ok_or(FsError::Invalid)?;
                match name {
                    Some(name) => Ok(Some(self.create_exclusive(
                        cred, obj_hdl, name, state, openflags, attrs_in, &verifier,
                    )?)),
                    None => {
                        self.open_exclusive(cred, obj_hdl, state, openflags, &verifier)?;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Re-opens an open state with different flags.
    pub fn reopen2(
        &self,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        openflags: OpenFlags,
    ) -> Result<()> {
        self.file_state_open(obj, state, openflags, true)
    }

    /// Current open flags of a state.
    pub fn status2(&self, state: &Arc<FsalState>) -> OpenFlags {
        state.fd.lock().openflags
    }

    /// Closes a state. Share states drive delete-on-close; lock and
    /// delegation states do not.
    pub fn close2(&self, obj: &Arc<FsalObj>, state: &Arc<FsalState>) -> Result<()> {
        match state.ty {
            StateType::Lock { .. } => {
                // The owning open state is closed separately.
                debug_assert!(state.fd.lock().invariant_closed());
                Ok(())
            }
            StateType::Share => {
                self.file_state_close(obj, state)?;
                self.delete_on_close(obj)
            }
            StateType::Deleg => {
                log::trace!("closing delegation state {}", state.id);
                Ok(())
            }
        }
    }

    /// Destroys a regular file on the last close after its last link
    /// went away.
    fn delete_on_close(&self, obj: &Arc<FsalObj>) -> Result<()> {
        if !obj.fh.lock().stat().is_reg() {
            log::debug!("only a regular file is destroyed on close");
            return Ok(());
        }
        if obj.is_open() {
            log::trace!("ino {} still open", obj.ino());
            return Ok(());
        }
        if let Err(err) = self.fs.destroy_orphaned_file(obj.ino()) {
            log::error!("failed to destroy file object {}: {}", obj.ino(), err);
            return Err(err);
        }
        // Drop the cache entry once the node is gone.
        if self.fs.getattr(&Cred::root(), obj.ino()).is_err() {
            self.objs.lock().remove(&obj.ino());
        }
        Ok(())
    }

    /// Delegations are internal opens: granting takes a read or write
    /// open, releasing closes it through the normal path.
    pub fn lease_op2(
        &self,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        deleg: DelegKind,
    ) -> Result<()> {
        debug_assert!(state.ty == StateType::Deleg);
        match deleg {
            DelegKind::None => {
                debug_assert!(state.fd.lock().invariant_open());
                self.file_state_close(obj, state)
            }
            DelegKind::Read => {
                debug_assert!(state.fd.lock().invariant_closed());
                self.file_state_open(obj, state, OpenFlags::READ, false)
            }
            DelegKind::Write => {
                debug_assert!(state.fd.lock().invariant_closed());
                self.file_state_open(obj, state, OpenFlags::WRITE, false)
            }
        }
    }

    /// Reads through an open state; readers share the FH lock.
    pub fn read2(
        &self,
        cred: &Cred,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<(usize, bool)> {
        let fd = self.find_fd(state, false, OpenFlags::READ)?;
        let _guard = obj.lock.read().unwrap();
        self.fs.read(cred, fd.ino, offset, buf)
    }

    /// Writes through an open state; the FH lock is held exclusively so
    /// the stat update stays in step with the data.
    pub fn write2(
        &self,
        cred: &Cred,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize> {
        let fd = self.find_fd(state, false, OpenFlags::WRITE)?;
        let _guard = obj.lock.write().unwrap();
        self.fs.write(cred, fd.ino, offset, buf)
    }

    /// Directory listing with NFS cookie semantics. `whence` is the
    /// last cookie the consumer saw; entries are presented in key order
    /// with cookies starting at `FIRST_COOKIE`. Returns the eof flag:
    /// false when the consumer stopped before the last entry.
    pub fn readdir2<F>(
        &self,
        cred: &Cred,
        dir: &Arc<FsalObj>,
        whence: Option<u64>,
        mut cb: F,
    ) -> Result<bool>
    where
        F: FnMut(&str, &Stat, u64) -> bool,
    {
        let whence = match whence {
            Some(cookie) => cookie + 1,
            None => FIRST_COOKIE,
        };
        let mut cookie = FIRST_COOKIE;
        let mut dir_continue = true;
        let mut eof = true;

        self.fs.readdir(cred, dir.ino(), |name, stat| {
            // Even after the consumer stopped we must learn whether this
            // was the last entry.
            if !dir_continue {
                eof = false;
                return false;
            }
            if cookie < whence {
                cookie += 1;
                return true;
            }
            dir_continue = cb(name, stat, cookie);
            cookie += 1;
            true
        })?;
        Ok(eof)
    }

    /// Removes a directory entry, dispatching on its type. A regular
    /// file that is still open elsewhere is only detached; destruction
    /// happens at its last close.
    pub fn remove(&self, cred: &Cred, dir: &Arc<FsalObj>, name: &str) -> Result<()> {
        let ino = self.fs.lookup(cred, dir.ino(), name)?;
        let stat = self.fs.getattr(cred, ino)?;

        if stat.is_dir() {
            return self.fs.rmdir(cred, dir.ino(), name);
        }

        let is_open = self
            .objs
            .lock()
            .get(&ino)
            .map(|obj| obj.is_open())
            .unwrap_or(false);
        if is_open {
            log::trace!("unlink of open file {}, deferring destruction", ino);
            self.fs.detach(cred, dir.ino(), ino, name)
        } else {
            self.fs.unlink(cred, dir.ino(), Some(ino), name)
        }
    }

    /// Renames an entry, marking the destination as open when some
    /// client still holds it so its destruction is deferred to close.
    pub fn rename(
        &self,
        cred: &Cred,
        src_dir: &Arc<FsalObj>,
        sname: &str,
        dst_dir: &Arc<FsalObj>,
        dname: &str,
    ) -> Result<()> {
        let pdst = match self.fs.lookup(cred, dst_dir.ino(), dname) {
            Ok(ino) => Some(ino),
            Err(FsError::NotFound) => None,
            Err(err) => return Err(err),
        };
        let is_dst_open = pdst
            .and_then(|ino| self.objs.lock().get(&ino).map(|obj| obj.is_open()))
            .unwrap_or(false);

        self.fs.rename(
            cred,
            src_dir.ino(),
            sname,
            None,
            dst_dir.ino(),
            dname,
            pdst,
            RenameFlags { is_dst_open },
        )
    }

    /// Commit is a no-op: writes reach the backend before `write2`
    /// returns, so everything is already stable.
    pub fn commit2(&self, _obj: &Arc<FsalObj>, _offset: u64, _len: usize) -> Result<()> {
        Ok(())
    }

    /// Truncates through an open state holding a write open.
    pub fn ftruncate2(
        &self,
        cred: &Cred,
        obj: &Arc<FsalObj>,
        state: &Arc<FsalState>,
        new_stat: &Stat,
        new_stat_flags: StatFlags,
    ) -> Result<()> {
        debug_assert!(new_stat_flags.contains(StatFlags::SIZE_SET));
        let fd = self.find_fd(state, false, OpenFlags::WRITE)?;
        let _guard = obj.lock.write().unwrap();
        self.fs.truncate(cred, fd.ino, new_stat, new_stat_flags)
    }
}
