//! IO-operation state machine
//!
//! Every read or write against an open object is modelled as an operation
//! that moves through `Init -> Submitted -> (Stable | Failed)` and is
//! destroyed on drop. The terminal transition fires the completion
//! callback exactly once; `wait` blocks until a terminal state and both
//! observers agree on the outcome. Submitting twice, or after a terminal
//! state, is a caller bug and is rejected.

use std::sync::{Arc, Condvar, Mutex};

use kvfs_api::{FsError, Result};

use crate::DstoreObj;
use crate::bufvec::{IoBuffer, IoVec};

/// Operation kind; only data-path reads and writes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOpType {
    Read,
    Write,
}

/// Completion callback, invoked once with the terminal result.
pub type IoOpCallback = Box<dyn FnOnce(Result<()>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    Init,
    Submitted,
    Stable,
    Failed(FsError),
}

/// One in-flight IO operation against an open object.
pub struct IoOp {
    obj: Arc<dyn DstoreObj>,
    ty: IoOpType,
    data: Mutex<Option<IoVec>>,
    state: Mutex<OpState>,
    done: Condvar,
    cb: Mutex<Option<IoOpCallback>>,
}

impl IoOp {
    /// Creates an operation in `Init` state. `Invalid` when the vector
    /// violates its invariant.
    pub fn init(
        obj: Arc<dyn DstoreObj>,
        ty: IoOpType,
        vec: IoVec,
        cb: Option<IoOpCallback>,
    ) -> Result<Self> {
        if !vec.invariant() {
            return Err(FsError::Invalid);
        }
        Ok(Self {
            obj,
            ty,
            data: Mutex::new(Some(vec)),
            state: Mutex::new(OpState::Init),
            done: Condvar::new(),
            cb: Mutex::new(cb),
        })
    }

    pub fn op_type(&self) -> IoOpType {
        self.ty
    }

    /// Sends the operation to the backend. The backends here complete
    /// synchronously, so the terminal transition (and the callback)
    /// happen before this returns; callers still observe completion via
    /// `wait` to stay correct for queueing backends.
    pub fn submit(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != OpState::Init {
                log::error!("io op submitted in state {:?}", *state);
                return Err(FsError::Invalid);
            }
            *state = OpState::Submitted;
        }

        let rc = self.execute();

        let mut state = self.state.lock().unwrap();
        *state = match rc {
            Ok(()) => OpState::Stable,
            Err(err) => OpState::Failed(err),
        };
        drop(state);

        if let Some(cb) = self.cb.lock().unwrap().take() {
            cb(rc);
        }
        self.done.notify_all();
        Ok(())
    }

    fn execute(&self) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let vec = data.as_mut().ok_or(FsError::Invalid)?;
        for buf in vec.iter_mut() {
            match self.ty {
                IoOpType::Read => self.obj.read_blocks(buf.offset, &mut buf.data)?,
                IoOpType::Write => self.obj.write_blocks(buf.offset, &buf.data)?,
            }
        }
        Ok(())
    }

    /// Blocks until the operation is stable or failed.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                OpState::Init => return Err(FsError::Invalid),
                OpState::Submitted => {
                    state = self.done.wait(state).unwrap();
                }
                OpState::Stable => return Ok(()),
                OpState::Failed(err) => return Err(err),
            }
        }
    }

    /// Takes the data vector out of a finished operation (read results).
    pub fn take_data(&self) -> Option<IoVec> {
        self.data.lock().unwrap().take()
    }
}

/// Submit-and-wait write of one aligned extent.
pub fn sync_write(obj: &Arc<dyn DstoreObj>, offset: u64, data: Vec<u8>) -> Result<()> {
    let op = IoOp::init(
        obj.clone(),
        IoOpType::Write,
        IoVec::from_buf(IoBuffer::new(data, offset)),
        None,
    )?;
    op.submit()?;
    op.wait()
}

/// Submit-and-wait read of one aligned extent.
pub fn sync_read(obj: &Arc<dyn DstoreObj>, offset: u64, len: usize) -> Result<Vec<u8>> {
    let op = IoOp::init(
        obj.clone(),
        IoOpType::Read,
        IoVec::from_buf(IoBuffer::zeroed(len, offset)),
        None,
    )?;
    op.submit()?;
    op.wait()?;
    let vec = op.take_data().ok_or(FsError::Invalid)?;
    match vec {
        IoVec::Single(buf) => Ok(buf.data),
        IoVec::Multi(_) => Err(FsError::Invalid),
    }
}
