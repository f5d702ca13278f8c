//! Coarse-tick timing wheel for mass per-operation timeouts.
//!
//! Deadlines round *up* to the next tick (default 10 ms), so a timeout
//! never fires early, only up to one tick late. Schedule and cancel are
//! O(1); advancing visits only the slots the clock actually crossed. This
//! keeps bookkeeping flat when thousands of sockets carry timeouts at once
//! — the job full-resolution heaps are too expensive for.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{TimerAction, TimerHandle};

const WHEEL_SLOTS: usize = 256;

struct WheelEntry {
    handle: TimerHandle,
    /// Full wheel revolutions left before this entry is due.
    rounds: u32,
    action: TimerAction,
}

struct Inner {
    wheel: Vec<Vec<WheelEntry>>,
    /// Slot the cursor sits on; entries there fire when the cursor leaves.
    cursor: usize,
    /// Wall time of the cursor's tick.
    last_tick: Instant,
    cancelled: HashSet<TimerHandle>,
    /// Entries in the wheel, including not-yet-skipped cancelled ones.
    entries: usize,
    total_scheduled: u64,
    total_fired: u64,
    total_cancelled: u64,
}

/// Low-resolution, high-capacity relative-deadline scheduler.
pub struct CoarseTimer {
    tick: Duration,
    inner: Mutex<Inner>,
}

impl CoarseTimer {
    pub fn new(tick: Duration) -> Self {
        let tick = tick.max(Duration::from_millis(1));
        Self {
            tick,
            inner: Mutex::new(Inner {
                wheel: (0..WHEEL_SLOTS).map(|_| Vec::new()).collect(),
                cursor: 0,
                last_tick: Instant::now(),
                cancelled: HashSet::new(),
                entries: 0,
                total_scheduled: 0,
                total_fired: 0,
                total_cancelled: 0,
            }),
        }
    }

    #[inline]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Schedule `action` to fire no earlier than `delay` from now.
    pub fn schedule_in(&self, delay: Duration, action: TimerAction) -> TimerHandle {
        let handle = TimerHandle::next();
        let ticks = Self::ticks_for(delay, self.tick);

        let mut inner = self.inner.lock().unwrap();
        let slot = (inner.cursor + (ticks % WHEEL_SLOTS as u64) as usize) % WHEEL_SLOTS;
        // ticks that are an exact multiple of the wheel size sit on the
        // cursor's own slot, first visited a full revolution later.
        let rounds = ((ticks - 1) / WHEEL_SLOTS as u64) as u32;
        inner.wheel[slot].push(WheelEntry {
            handle,
            rounds,
            action,
        });
        inner.entries += 1;
        inner.total_scheduled += 1;
        handle
    }

    /// Deadlines round up: never early, at most one tick late.
    fn ticks_for(delay: Duration, tick: Duration) -> u64 {
        let t = tick.as_nanos().max(1);
        let d = delay.as_nanos();
        (((d + t - 1) / t) as u64).max(1)
    }

    /// Best-effort lazy cancel.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let fresh = inner.cancelled.insert(handle);
        if fresh {
            inner.total_cancelled += 1;
        }
        fresh
    }

    /// Cross every tick between the last advance and `now`, collecting due
    /// entries.
    pub fn advance(&self, now: Instant) -> Vec<TimerAction> {
        let mut inner = self.inner.lock().unwrap();
        let mut fired = Vec::new();

        loop {
            let next_tick = inner.last_tick + self.tick;
            if next_tick > now {
                break;
            }
            inner.last_tick = next_tick;
            inner.cursor = (inner.cursor + 1) % WHEEL_SLOTS;

            if inner.entries == 0 {
                continue;
            }

            let cursor = inner.cursor;
            let mut slot = std::mem::take(&mut inner.wheel[cursor]);
            slot.retain_mut(|entry| {
                if inner.cancelled.remove(&entry.handle) {
                    inner.entries -= 1;
                    return false;
                }
                if entry.rounds > 0 {
                    entry.rounds -= 1;
                    return true;
                }
                inner.entries -= 1;
                inner.total_fired += 1;
                // Placeholder swap; the real action moves into `fired`.
                fired.push(std::mem::replace(
                    &mut entry.action,
                    TimerAction::CancelOp(paio_core::id::ObjId::NONE),
                ));
                false
            });
            inner.wheel[cursor] = slot;
        }

        if inner.entries == 0 {
            inner.cancelled.clear();
        }
        fired
    }

    /// Coarse by design: when anything is scheduled, the next deadline is
    /// simply the next tick boundary.
    pub fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        if inner.entries > inner.cancelled.len() {
            Some(inner.last_tick + self.tick)
        } else {
            None
        }
    }

    /// Take every live entry regardless of deadline (kill drain).
    pub fn drain_all(&self) -> Vec<TimerAction> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for i in 0..WHEEL_SLOTS {
            let slot = std::mem::take(&mut inner.wheel[i]);
            for entry in slot {
                if inner.cancelled.remove(&entry.handle) {
                    continue;
                }
                out.push(entry.action);
            }
        }
        inner.entries = 0;
        inner.cancelled.clear();
        out
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.entries.saturating_sub(inner.cancelled.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CoarseTimerStats {
        let inner = self.inner.lock().unwrap();
        CoarseTimerStats {
            active: inner.entries.saturating_sub(inner.cancelled.len()),
            tick: self.tick,
            total_scheduled: inner.total_scheduled,
            total_fired: inner.total_fired,
            total_cancelled: inner.total_cancelled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoarseTimerStats {
    pub active: usize,
    pub tick: Duration,
    pub total_scheduled: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use paio_core::id::ObjId;

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
    fn test_rounds_up_never_early() {
        let timer = CoarseTimer::new(Duration::from_millis(10));
        let start = Instant::now();
        timer.schedule_in(Duration::from_millis(15), cancel_action(1));

        // One tick in: not due (15ms rounds up to 2 ticks).
        assert!(timer.advance(start + Duration::from_millis(10)).is_empty());
        // Two ticks in: due.
        let fired = timer.advance(start + Duration::from_millis(21));
        assert_eq!(fired.len(), 1);
        assert_eq!(obj_of(&fired[0]), 1);
    }

    #[test]
    fn test_zero_delay_takes_one_tick() {
        let timer = CoarseTimer::new(Duration::from_millis(10));
        let start = Instant::now();
        timer.schedule_in(Duration::ZERO, cancel_action(1));
        assert_eq!(timer.len(), 1);
        let fired = timer.advance(start + Duration::from_millis(11));
        assert_eq!(fired.len(), 1);
        assert!(timer.is_empty());
    }

    #[test]
    fn test_long_delay_survives_revolutions() {
        // 1ms tick, 256-slot wheel: 300ms needs a second revolution.
        let timer = CoarseTimer::new(Duration::from_millis(1));
        let start = Instant::now();
        timer.schedule_in(Duration::from_millis(300), cancel_action(7));

        assert!(timer.advance(start + Duration::from_millis(260)).is_empty());
        let fired = timer.advance(start + Duration::from_millis(301));
        assert_eq!(fired.len(), 1);
        assert_eq!(obj_of(&fired[0]), 7);
    }

    #[test]
    fn test_cancel_skips_entry() {
        let timer = CoarseTimer::new(Duration::from_millis(10));
        let start = Instant::now();
        let h = timer.schedule_in(Duration::from_millis(10), cancel_action(1));
        assert!(timer.cancel(h));
        assert!(!timer.cancel(h));
        assert_eq!(timer.len(), 0);
        assert!(timer.advance(start + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_next_deadline_is_tick_granular() {
        let timer = CoarseTimer::new(Duration::from_millis(10));
        assert!(timer.next_deadline().is_none());
        timer.schedule_in(Duration::from_millis(500), cancel_action(1));
        let d = timer.next_deadline().unwrap();
        assert!(d <= Instant::now() + Duration::from_millis(20));
    }

    #[test]
    fn test_drain_all() {
        let timer = CoarseTimer::new(Duration::from_millis(10));
        timer.schedule_in(Duration::from_secs(5), cancel_action(1));
        let h = timer.schedule_in(Duration::from_secs(9), cancel_action(2));
        timer.cancel(h);

        let drained = timer.drain_all();
        assert_eq!(drained.len(), 1);
        assert_eq!(obj_of(&drained[0]), 1);
        assert!(timer.is_empty());
    }

    #[test]
    fn test_idle_fast_forward() {
        let timer = CoarseTimer::new(Duration::from_millis(1));
        let start = Instant::now();
        // Nothing scheduled: a long advance must stay cheap and leave the
        // wheel consistent for later entries.
        timer.advance(start + Duration::from_secs(5));
        timer.schedule_in(Duration::from_millis(3), cancel_action(1));
        let fired = timer.advance(start + Duration::from_secs(6));
        assert_eq!(fired.len(), 1);
    }
}
