//! # paio-core
//!
//! Core types and traits for the PAIO proactor engine.
//!
//! This crate is the dependency-free foundation: every other crate in the
//! workspace — the coordinator, the backends, the demos — speaks in these
//! types and depends on the `IoBackend` trait, never on a concrete backend.
//!
//! ## Modules
//!
//! - `id` - generation-checked object identifier
//! - `op` - opcodes, terminal states, the per-opcode trait table
//! - `event` - completion events and their parameter/result payloads
//! - `classify` - raw-result buckets and the state classifier
//! - `backend` - the `IoBackend` contract
//! - `error` - error types
//! - `spinlock` - internal spinlock primitive
//! - `slot` - slot allocator for the object arena
//! - `kprint` - leveled debug printing macros
//! - `env` - environment variable utilities

pub mod backend;
pub mod classify;
pub mod env;
pub mod error;
pub mod event;
pub mod id;
pub mod kprint;
pub mod op;
pub mod slot;
pub mod spinlock;

// Re-exports for convenience
pub use backend::{Completed, IoBackend, SubmitRejected};
pub use classify::{classify, Classified, RawBucket};
pub use env::{env_get, env_get_bool};
pub use error::{AioError, AioResult, SubmitError};
pub use event::{CallbackAction, CompletionEvent, EventCallback, OpParams, OpResult};
pub use id::ObjId;
pub use op::{ObjectKind, OpClass, OpCode, OpState, OP_COUNT};
pub use slot::SlotAllocator;
pub use spinlock::{SpinGuard, SpinLock};
