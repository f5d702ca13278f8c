//! Completion event — the lingua franca between submitters, the
//! coordinator, the backend, and the timers.
//!
//! A `CompletionEvent` is created once per submission, boxed, and never
//! moved again until the callback has run: backend scratch (iovecs, msghdr)
//! may hold pointers into its buffers. The submitter gives up buffer
//! ownership on submit and reads results back inside the callback.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Instant;

use crate::id::ObjId;
use crate::op::{OpCode, OpState};

/// Advisory verdict returned by a completion callback.
///
/// Only `Accept` with state `Ok` consults it: `Continue` re-arms the accept
/// with the same callback. It never stops a worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Completion callback. Shared (`Arc`) so a resubmitted accept reuses it.
pub type EventCallback = Arc<dyn Fn(&CompletionEvent) -> CallbackAction + Send + Sync>;

/// Per-opcode submission parameters. Owns every buffer and address.
#[derive(Debug)]
pub enum OpParams {
    Accept,
    Connect { addr: SocketAddr },
    Recv { buf: Vec<u8> },
    Send { buf: Vec<u8> },
    RecvFrom { buf: Vec<u8> },
    SendTo { buf: Vec<u8>, addr: SocketAddr },
    RecvVector { bufs: Vec<Vec<u8>> },
    SendVector { bufs: Vec<Vec<u8>> },
    SendFile { src: RawFd, offset: u64, count: usize },
    FileRead { buf: Vec<u8>, offset: Option<u64> },
    FileWrite { buf: Vec<u8>, offset: Option<u64> },
    FileReadVector { bufs: Vec<Vec<u8>>, offset: Option<u64> },
    FileWriteVector { bufs: Vec<Vec<u8>>, offset: Option<u64> },
    FileSync { data_only: bool },
    RunTask { deadline: Instant },
}

impl OpParams {
    pub fn opcode(&self) -> OpCode {
        match self {
            OpParams::Accept => OpCode::Accept,
            OpParams::Connect { .. } => OpCode::Connect,
            OpParams::Recv { .. } => OpCode::Recv,
            OpParams::Send { .. } => OpCode::Send,
            OpParams::RecvFrom { .. } => OpCode::RecvFrom,
            OpParams::SendTo { .. } => OpCode::SendTo,
            OpParams::RecvVector { .. } => OpCode::RecvVector,
            OpParams::SendVector { .. } => OpCode::SendVector,
            OpParams::SendFile { .. } => OpCode::SendFile,
            OpParams::FileRead { .. } => OpCode::FileRead,
            OpParams::FileWrite { .. } => OpCode::FileWrite,
            OpParams::FileReadVector { .. } => OpCode::FileReadVector,
            OpParams::FileWriteVector { .. } => OpCode::FileWriteVector,
            OpParams::FileSync { .. } => OpCode::FileSync,
            OpParams::RunTask { .. } => OpCode::RunTask,
        }
    }

    /// Validate what can be validated before submission.
    ///
    /// Rejections here mean no callback will ever fire and the caller gets
    /// its buffers back.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            OpParams::Recv { buf } | OpParams::RecvFrom { buf } if buf.is_empty() => {
                Err("empty receive buffer")
            }
            OpParams::Send { buf } | OpParams::SendTo { buf, .. } if buf.is_empty() => {
                Err("empty send buffer")
            }
            OpParams::RecvVector { bufs } | OpParams::SendVector { bufs }
                if bufs.is_empty() || bufs.iter().any(|b| b.is_empty()) =>
            {
                Err("empty vector")
            }
            OpParams::FileRead { buf, .. } if buf.is_empty() => Err("empty read buffer"),
            OpParams::FileWrite { buf, .. } if buf.is_empty() => Err("empty write buffer"),
            OpParams::FileReadVector { bufs, .. } | OpParams::FileWriteVector { bufs, .. }
                if bufs.is_empty() || bufs.iter().any(|b| b.is_empty()) =>
            {
                Err("empty vector")
            }
            OpParams::SendFile { src, count, .. } => {
                if *src < 0 {
                    Err("bad source fd")
                } else if *count == 0 {
                    Err("zero send-file count")
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

/// Results filled in by the backend / classifier before the callback runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpResult {
    /// Bytes transferred (recv/send/read/write families).
    pub bytes: usize,
    /// Accepted connection handle (accept only).
    pub accepted: Option<RawFd>,
    /// Peer address (accept / recv-from).
    pub peer: Option<SocketAddr>,
    /// Raw errno when the state is `Failed`.
    pub errno: i32,
}

/// One submitted/completed asynchronous operation.
pub struct CompletionEvent {
    pub obj: ObjId,
    pub op: OpCode,
    pub state: OpState,
    pub params: OpParams,
    pub result: OpResult,
    pub callback: EventCallback,
}

impl CompletionEvent {
    /// Build a fresh event in the `Pending` state, boxed once for a stable
    /// address over its whole in-flight life.
    pub fn new(obj: ObjId, params: OpParams, callback: EventCallback) -> Box<Self> {
        let op = params.opcode();
        Box::new(Self {
            obj,
            op,
            state: OpState::Pending,
            params,
            result: OpResult::default(),
            callback,
        })
    }

    /// Invoke the callback. The event must already be in a terminal state.
    #[inline]
    pub fn invoke(&self) -> CallbackAction {
        debug_assert!(self.state.is_terminal());
        (self.callback)(self)
    }
}

impl std::fmt::Debug for CompletionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionEvent")
            .field("obj", &self.obj)
            .field("op", &self.op)
            .field("state", &self.state)
            .field("result", &self.result)
            .finish()
    }
}
