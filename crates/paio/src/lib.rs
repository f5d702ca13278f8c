//! # paio — a proactor-style async I/O completion engine
//!
//! Submit an operation, get exactly one completion callback: accept,
//! connect, stream and datagram send/receive (plain and vectored),
//! positioned file I/O, fsync, and scheduled tasks all flow through one
//! completion path driven by N symmetric worker threads.
//!
//! ```ignore
//! use paio::{Proactor, ObjectKind, CallbackAction};
//! use std::sync::Arc;
//!
//! let p = Arc::new(Proactor::new(1024)?);
//! let workers = p.spawn_workers(2);
//!
//! let sock = p.add_object(listener_fd, ObjectKind::Socket)?;
//! p.submit_accept(sock, Arc::new(|ev| {
//!     // ev.result.accepted / ev.result.peer
//!     CallbackAction::Continue // keep accepting
//! }))?;
//!
//! // ... later:
//! p.kill();
//! for w in workers { let _ = w.join(); }
//! p.exit();
//! ```
//!
//! Structure:
//! - `arena` - async objects and the generation-checked arena owning them
//! - `timer` - dual timers (precise deadlines + coarse timeout wheel)
//! - `proactor` - the coordinator and worker loop
//! - `config` - tunables with env overrides

pub mod arena;
pub mod config;
pub mod proactor;
mod submit;
pub mod timer;

pub use arena::AsyncObject;
pub use config::ProactorConfig;
pub use proactor::{Proactor, ProactorStats};

// One-stop re-exports so clients only depend on this crate.
pub use paio_core::{
    AioError, AioResult, CallbackAction, Completed, CompletionEvent, EventCallback, IoBackend,
    ObjId, ObjectKind, OpClass, OpCode, OpParams, OpResult, OpState, RawBucket, SubmitError,
};
