//! Absolute-deadline one-shot timer (min-heap).
//!
//! # Complexity
//!
//! - Schedule: O(log n)
//! - Cancel: O(1) amortized (lazy cancellation)
//! - Advance: O(k log n) for k expired entries
//! - Next deadline: O(1)
//!
//! Cancelled handles go into a set and are skipped at pop time; the set is
//! cleared whenever the heap empties, so it cannot grow unbounded.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use super::{TimerAction, TimerHandle};

struct HeapEntry {
    deadline: Instant,
    handle: TimerHandle,
    action: TimerAction,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.handle == other.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed for a min-heap; tie-break on handle for determinism.
        match other.deadline.cmp(&self.deadline) {
            CmpOrdering::Equal => other.handle.0.cmp(&self.handle.0),
            ord => ord,
        }
    }
}

struct Inner {
    heap: BinaryHeap<HeapEntry>,
    cancelled: HashSet<TimerHandle>,
    total_scheduled: u64,
    total_fired: u64,
    total_cancelled: u64,
}

/// Full-resolution scheduler for explicitly requested deadlines.
pub struct PreciseTimer {
    inner: Mutex<Inner>,
}

impl PreciseTimer {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::with_capacity(capacity),
                cancelled: HashSet::new(),
                total_scheduled: 0,
                total_fired: 0,
                total_cancelled: 0,
            }),
        }
    }

    pub fn schedule_at(&self, deadline: Instant, action: TimerAction) -> TimerHandle {
        let handle = TimerHandle::next();
        let mut inner = self.inner.lock().unwrap();
        inner.heap.push(HeapEntry {
            deadline,
            handle,
            action,
        });
        inner.total_scheduled += 1;
        handle
    }

    /// Best-effort: returns false if the handle already fired or was
    /// cancelled before.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let fresh = inner.cancelled.insert(handle);
        if fresh {
            inner.total_cancelled += 1;
        }
        fresh
    }

    /// Pop everything due at `now`, in deadline order.
    pub fn advance(&self, now: Instant) -> Vec<TimerAction> {
        let mut inner = self.inner.lock().unwrap();
        let mut fired = Vec::new();

        while let Some(top) = inner.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = inner.heap.pop().unwrap();
            if inner.cancelled.remove(&entry.handle) {
                continue;
            }
            inner.total_fired += 1;
            fired.push(entry.action);
        }

        if inner.heap.is_empty() {
            inner.cancelled.clear();
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner.heap.peek().map(|e| e.deadline)
    }

    /// Take every remaining entry regardless of deadline (kill drain).
    pub fn drain_all(&self) -> Vec<TimerAction> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = Vec::with_capacity(inner.heap.len());
        while let Some(entry) = inner.heap.pop() {
            if inner.cancelled.remove(&entry.handle) {
                continue;
            }
            out.push(entry.action);
        }
        inner.cancelled.clear();
        out
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.heap.len().saturating_sub(inner.cancelled.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PreciseTimerStats {
        let inner = self.inner.lock().unwrap();
        PreciseTimerStats {
            active: inner.heap.len().saturating_sub(inner.cancelled.len()),
            total_scheduled: inner.total_scheduled,
            total_fired: inner.total_fired,
            total_cancelled: inner.total_cancelled,
        }
    }
}

impl Default for PreciseTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct PreciseTimerStats {
    pub active: usize,
    pub total_scheduled: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use paio_core::id::ObjId;
    use std::time::Duration;

    fn cancel_action(n: u32) -> TimerAction {
        TimerAction::CancelOp(ObjId::new(n, 1))
    }

    fn obj_of(action: &TimerAction) -> u32 {
        match action {
            TimerAction::CancelOp(id) => id.index,
            _ => panic!("unexpected action"),
        }
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let timer = PreciseTimer::new();
        let now = Instant::now();

        timer.schedule_at(now + Duration::from_millis(30), cancel_action(3));
        timer.schedule_at(now + Duration::from_millis(10), cancel_action(1));
        timer.schedule_at(now + Duration::from_millis(20), cancel_action(2));

        let fired = timer.advance(now + Duration::from_millis(50));
        let order: Vec<u32> = fired.iter().map(obj_of).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(timer.is_empty());
    }

    #[test]
    fn test_not_due_stays() {
        let timer = PreciseTimer::new();
        let now = Instant::now();
        timer.schedule_at(now + Duration::from_secs(10), cancel_action(1));

        assert!(timer.advance(now).is_empty());
        assert_eq!(timer.len(), 1);
        assert!(timer.next_deadline().unwrap() > now);
    }

    #[test]
    fn test_cancel_is_lazy_and_idempotent() {
        let timer = PreciseTimer::new();
        let now = Instant::now();
        let h = timer.schedule_at(now + Duration::from_millis(5), cancel_action(1));

        assert!(timer.cancel(h));
        assert!(!timer.cancel(h));
        assert_eq!(timer.len(), 0);
        assert!(timer.advance(now + Duration::from_secs(1)).is_empty());

        let stats = timer.stats();
        assert_eq!(stats.total_cancelled, 1);
        assert_eq!(stats.total_fired, 0);
    }

    #[test]
    fn test_drain_all_skips_cancelled() {
        let timer = PreciseTimer::new();
        let now = Instant::now();
        timer.schedule_at(now + Duration::from_secs(100), cancel_action(1));
        let h = timer.schedule_at(now + Duration::from_secs(200), cancel_action(2));
        timer.cancel(h);

        let drained = timer.drain_all();
        assert_eq!(drained.len(), 1);
        assert_eq!(obj_of(&drained[0]), 1);
        assert!(timer.is_empty());
    }
}
