//! Async objects and the arena that owns them.
//!
//! The arena is the single owner of every `AsyncObject`. Everyone else —
//! in-flight events, timer tasks, client code — holds a generation-checked
//! `ObjId` and resolves it here at the moment of use. A slot's generation
//! bumps on every insert, so an id kept past `remove` resolves to nothing
//! instead of aliasing the slot's next tenant.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use paio_core::error::AioResult;
use paio_core::id::ObjId;
use paio_core::op::{ObjectKind, OpClass};
use paio_core::slot::SlotAllocator;
use paio_core::spinlock::SpinLock;

/// A handle wrapper bound to exactly one OS resource.
///
/// The raw handle is exclusively owned: it is closed when the object is
/// dropped (`Task` objects carry no handle). Lifecycle flags are atomic —
/// they are read and written by submitters, workers, and timer tasks
/// concurrently, with no lock.
pub struct AsyncObject {
    id: ObjId,
    kind: ObjectKind,
    handle: AtomicI32,
    /// Per-class operation timeout in ms; 0 means no timeout.
    timeouts: [AtomicU64; OpClass::COUNT],
    pub(crate) killed: AtomicBool,
    /// At most one completion event is pending against this object.
    pub(crate) pending: AtomicBool,
    /// The completion callback is currently executing.
    pub(crate) calling: AtomicBool,
    /// The coarse timer requested cancellation of the pending op.
    pub(crate) timed_out: AtomicBool,
    /// Active coarse-timer handle for the pending op's timeout (0 = none).
    pub(crate) timeout_timer: AtomicU64,
}

impl AsyncObject {
    fn new(id: ObjId, kind: ObjectKind, handle: RawFd) -> Self {
        Self {
            id,
            kind,
            handle: AtomicI32::new(handle),
            timeouts: std::array::from_fn(|_| AtomicU64::new(0)),
            killed: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            calling: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            timeout_timer: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> ObjId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    #[inline]
    pub fn handle(&self) -> RawFd {
        self.handle.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Timeout applies to operations submitted after the change; no
    /// synchronization with anything already in flight.
    #[inline]
    pub fn timeout_ms(&self, class: OpClass) -> u64 {
        self.timeouts[class.index()].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_timeout_ms(&self, class: OpClass, ms: u64) {
        self.timeouts[class.index()].store(ms, Ordering::Relaxed);
    }

    /// Claim the single pending slot. Fails if an operation is in flight.
    #[inline]
    pub(crate) fn try_acquire_pending(&self) -> bool {
        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub(crate) fn clear_pending(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Give the handle back to the caller (used when a bind fails mid-add:
    /// the object never owned the fd from the caller's point of view).
    pub(crate) fn forget_handle(&self) {
        self.handle.store(-1, Ordering::Relaxed);
    }
}

impl Drop for AsyncObject {
    fn drop(&mut self) {
        let fd = self.handle.swap(-1, Ordering::Relaxed);
        if fd >= 0 && self.kind != ObjectKind::Task {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

struct ArenaSlot {
    generation: AtomicU32,
    obj: SpinLock<Option<Arc<AsyncObject>>>,
}

/// Fixed-capacity object arena, spinlocked per slot for add/remove only —
/// steady-state submission never touches these locks beyond one clone.
pub struct Arena {
    slots: Box<[ArenaSlot]>,
    allocator: SlotAllocator,
}

impl Arena {
    pub fn new(capacity: usize) -> Self {
        let slots: Vec<ArenaSlot> = (0..capacity)
            .map(|_| ArenaSlot {
                generation: AtomicU32::new(0),
                obj: SpinLock::new(None),
            })
            .collect();
        Self {
            slots: slots.into_boxed_slice(),
            allocator: SlotAllocator::new(capacity),
        }
    }

    pub fn insert(&self, handle: RawFd, kind: ObjectKind) -> AioResult<Arc<AsyncObject>> {
        let idx = self.allocator.allocate()?;
        let slot = &self.slots[idx as usize];
        let generation = slot.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let obj = Arc::new(AsyncObject::new(ObjId::new(idx, generation), kind, handle));
        *slot.obj.lock() = Some(Arc::clone(&obj));
        Ok(obj)
    }

    /// Resolve an id. Fails on stale generation or empty slot.
    pub fn get(&self, id: ObjId) -> Option<Arc<AsyncObject>> {
        let slot = self.slots.get(id.index as usize)?;
        let guard = slot.obj.lock();
        guard.as_ref().filter(|o| o.id() == id).cloned()
    }

    /// Release a slot. The returned `Arc` may outlive the slot briefly on
    /// worker threads; the handle closes when the last reference drops.
    pub fn remove(&self, id: ObjId) -> Option<Arc<AsyncObject>> {
        let slot = self.slots.get(id.index as usize)?;
        let taken = {
            let mut guard = slot.obj.lock();
            if guard.as_ref().map(|o| o.id()) == Some(id) {
                guard.take()
            } else {
                None
            }
        };
        if taken.is_some() {
            self.allocator.release(id.index);
        }
        taken
    }

    /// Visit every live object (used by the kill drain). The callback runs
    /// outside the slot lock.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<AsyncObject>)) {
        for slot in self.slots.iter() {
            let obj = slot.obj.lock().clone();
            if let Some(obj) = obj {
                f(&obj);
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.allocator.allocated() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.allocator.capacity() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let arena = Arena::new(4);
        let obj = arena.insert(-1, ObjectKind::Task).unwrap();
        let id = obj.id();

        assert!(arena.get(id).is_some());
        assert_eq!(arena.len(), 1);

        arena.remove(id).unwrap();
        assert!(arena.get(id).is_none());
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn test_stale_id_never_aliases() {
        let arena = Arena::new(1);
        let first = arena.insert(-1, ObjectKind::Task).unwrap().id();
        arena.remove(first).unwrap();

        // Same slot, new generation.
        let second = arena.insert(-1, ObjectKind::Task).unwrap().id();
        assert_eq!(first.index, second.index);
        assert_ne!(first.generation, second.generation);
        assert!(arena.get(first).is_none());
        assert!(arena.get(second).is_some());
    }

    #[test]
    fn test_capacity_bound() {
        let arena = Arena::new(2);
        arena.insert(-1, ObjectKind::Task).unwrap();
        arena.insert(-1, ObjectKind::Task).unwrap();
        assert!(arena.insert(-1, ObjectKind::Task).is_err());
    }

    #[test]
    fn test_pending_is_exclusive() {
        let arena = Arena::new(1);
        let obj = arena.insert(-1, ObjectKind::Task).unwrap();
        assert!(obj.try_acquire_pending());
        assert!(!obj.try_acquire_pending());
        obj.clear_pending();
        assert!(obj.try_acquire_pending());
    }

    #[test]
    fn test_timeouts_per_class() {
        let arena = Arena::new(1);
        let obj = arena.insert(-1, ObjectKind::Socket).unwrap();
        assert_eq!(obj.timeout_ms(OpClass::Recv), 0);
        obj.set_timeout_ms(OpClass::Recv, 250);
        obj.set_timeout_ms(OpClass::Send, 500);
        assert_eq!(obj.timeout_ms(OpClass::Recv), 250);
        assert_eq!(obj.timeout_ms(OpClass::Send), 500);
        assert_eq!(obj.timeout_ms(OpClass::Accept), 0);
    }
}
