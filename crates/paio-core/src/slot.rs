//! Slot allocator for the object arena.
//!
//! Hands out indices in `0..capacity`. Freed indices are reused LIFO for
//! cache-friendly behavior; fresh indices are claimed with a CAS so
//! allocation is safe from any thread.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{AioError, AioResult};
use crate::spinlock::SpinLock;

pub struct SlotAllocator {
    /// LIFO stack of freed indices.
    free_stack: SpinLock<Vec<u32>>,
    /// Next never-used index.
    next_fresh: AtomicU32,
    capacity: u32,
    allocated: AtomicU32,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            // Pre-sized so release never reallocates under the spinlock.
            free_stack: SpinLock::new(Vec::with_capacity(capacity)),
            next_fresh: AtomicU32::new(0),
            capacity: capacity as u32,
            allocated: AtomicU32::new(0),
        }
    }

    /// Claim an index, preferring recently freed ones.
    pub fn allocate(&self) -> AioResult<u32> {
        if let Some(idx) = self.free_stack.lock().pop() {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            return Ok(idx);
        }

        loop {
            let current = self.next_fresh.load(Ordering::Acquire);
            if current >= self.capacity {
                return Err(AioError::AtCapacity);
            }
            match self.next_fresh.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.allocated.fetch_add(1, Ordering::Relaxed);
                    return Ok(current);
                }
                Err(_) => continue,
            }
        }
    }

    /// Return an index for reuse.
    pub fn release(&self, idx: u32) {
        debug_assert!(idx < self.capacity);
        self.free_stack.lock().push(idx);
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
