//! Dual-timer subsystem.
//!
//! Two independent schedulers with one action vocabulary:
//!
//! - `PreciseTimer` — absolute-deadline one-shot tasks at full `Instant`
//!   resolution. Backs scheduled run-task operations.
//! - `CoarseTimer` — relative deadlines rounded up to a coarse tick.
//!   Backs per-operation timeouts and deferred submissions, where
//!   thousands of entries may be outstanding and bookkeeping must be
//!   cheap, not exact.
//!
//! Workers drive both: each loop iteration computes its wait budget from
//! `next_deadline()` of both timers, then calls `advance()` after the wait
//! and acts on whatever fired.

mod coarse;
mod precise;

pub use coarse::{CoarseTimer, CoarseTimerStats};
pub use precise::{PreciseTimer, PreciseTimerStats};

use std::sync::atomic::{AtomicU64, Ordering};

use paio_core::event::CompletionEvent;
use paio_core::id::ObjId;

/// Handle for cancelling a scheduled task. Process-unique, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl TimerHandle {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a fired timer task asks the worker loop to do.
pub enum TimerAction {
    /// Deferred submission reached its delay: hand the event to the backend.
    Submit(Box<CompletionEvent>),
    /// Scheduled run-task fired: complete the event through the normal
    /// delivery path.
    Complete(Box<CompletionEvent>),
    /// A pending operation outlived its timeout: request cancellation.
    CancelOp(ObjId),
}

impl std::fmt::Debug for TimerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerAction::Submit(ev) => write!(f, "Submit({})", ev.op),
            TimerAction::Complete(ev) => write!(f, "Complete({})", ev.op),
            TimerAction::CancelOp(id) => write!(f, "CancelOp({})", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_uniqueness() {
        let a = TimerHandle::next();
        let b = TimerHandle::next();
        let c = TimerHandle::next();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(a.0 > 0);
    }
}
