//! The proactor coordinator and its worker loop.
//!
//! Owns the backend, the object arena, both timers, and two bounded
//! submission lanes (accept/connect/task entries ahead of data I/O). Any
//! number of threads run `run_loop`; each iteration:
//!
//! ```text
//! loop {
//!     1. Pump a bounded batch from the lanes (high before low),
//!        arming coarse timeouts and handing events to backend.submit
//!     2. backend.wait(delay) where delay = min(next timer deadlines, cap)
//!     3. Advance both timers; act on what fired
//!     4. Deliver each completion: classify, apply the kill override,
//!        clear pending, run the callback
//! }
//! ```
//!
//! Every submission that was accepted gets exactly one terminal callback:
//! a kill reroutes queued/in-flight/deferred work to `Killed` delivery (the
//! last worker out drains), and a locally rejected backend submission is
//! delivered as `Failed` through the same path.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use paio_core::backend::IoBackend;
use paio_core::classify::{classify, RawBucket};
use paio_core::error::{AioError, AioResult, SubmitError};
use paio_core::event::{CallbackAction, CompletionEvent, OpParams};
use paio_core::id::ObjId;
use paio_core::op::{ObjectKind, OpClass, OpCode, OpState};
use paio_core::{kdebug, kerror, kinfo, kwarn};
use paio_uring::{UringBackend, UringConfig};

use crate::arena::{Arena, AsyncObject};
use crate::config::ProactorConfig;
use crate::timer::{CoarseTimer, PreciseTimer, TimerAction, TimerHandle};

/// Lane entries handed to the backend per loop iteration.
const SUBMIT_BATCH: usize = 16;

/// How a completion reaches delivery.
enum Disposition {
    /// Backend-reported raw result, to be classified.
    Bucket(RawBucket),
    /// State decided by the engine itself (timer firings, local failures,
    /// kill drain).
    Forced(OpState, i32),
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    callbacks: AtomicU64,
    timeouts: AtomicU64,
    killed_ops: AtomicU64,
}

/// Lifetime counters snapshot.
#[derive(Debug, Clone)]
pub struct ProactorStats {
    pub submitted: u64,
    pub completed: u64,
    pub callbacks: u64,
    pub timeouts: u64,
    pub killed: u64,
    pub objects: usize,
    pub active_workers: usize,
}

/// The coordinator (see module docs).
pub struct Proactor {
    config: ProactorConfig,
    backend: Box<dyn IoBackend>,
    arena: Arena,
    high: ArrayQueue<Box<CompletionEvent>>,
    low: ArrayQueue<Box<CompletionEvent>>,
    precise: PreciseTimer,
    coarse: CoarseTimer,
    killed: AtomicBool,
    drained: AtomicBool,
    active_workers: AtomicUsize,
    counters: Counters,
}

impl Proactor {
    /// Create a proactor with the default io_uring backend.
    pub fn new(capacity: usize) -> AioResult<Self> {
        Self::with_config(ProactorConfig::new(capacity))
    }

    pub fn with_config(config: ProactorConfig) -> AioResult<Self> {
        let backend = UringBackend::new(UringConfig {
            sq_entries: config.sq_entries,
            capacity: config.capacity,
        })?;
        Ok(Self::with_backend(config, Box::new(backend)))
    }

    /// Inject a backend (other completion facilities, test stubs).
    pub fn with_backend(config: ProactorConfig, backend: Box<dyn IoBackend>) -> Self {
        paio_core::kprint::init();
        Self {
            arena: Arena::new(config.capacity),
            high: ArrayQueue::new(config.queue_depth),
            low: ArrayQueue::new(config.queue_depth),
            precise: PreciseTimer::new(),
            coarse: CoarseTimer::new(config.tick),
            killed: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
            counters: Counters::default(),
            backend,
            config,
        }
    }

    // ── Object lifecycle ──

    /// Bind a handle and register it with the backend.
    ///
    /// On failure the caller keeps ownership of `handle`.
    pub fn add_object(&self, handle: RawFd, kind: ObjectKind) -> AioResult<ObjId> {
        if self.is_killed() {
            return Err(AioError::EngineKilled);
        }
        let obj = self.arena.insert(handle, kind)?;
        let id = obj.id();
        if let Err(e) = self.backend.bind(id, handle, kind) {
            obj.forget_handle();
            self.arena.remove(id);
            return Err(e);
        }
        kdebug!("add {} fd={} kind={:?}", id, handle, kind);
        Ok(id)
    }

    /// Unregister and release an object, closing its handle.
    ///
    /// Blocks in bounded 1 ms polls until the object's in-flight operation
    /// (if any) has delivered. `from_callback` permits removal from inside
    /// the object's own completion callback without self-deadlock.
    pub fn remove_object(&self, id: ObjId, from_callback: bool) -> AioResult<()> {
        let obj = self.arena.get(id).ok_or(AioError::UnknownObject)?;
        let mut retries = 0u32;
        loop {
            let busy = obj.pending.load(Ordering::Acquire)
                || (!from_callback && obj.calling.load(Ordering::Acquire));
            if !busy {
                break;
            }
            if retries >= self.config.remove_retries {
                kwarn!("remove {}: still busy after {} polls", id, retries);
                return Err(AioError::Busy);
            }
            retries += 1;
            thread::sleep(Duration::from_millis(1));
        }
        self.backend.unbind(id);
        self.arena.remove(id);
        kdebug!("remove {}", id);
        Ok(())
    }

    /// Idempotent: mark the object dead and ask the backend to cancel its
    /// in-flight operation. The cancellation itself is asynchronous — the
    /// operation still surfaces with a terminal state.
    pub fn kill_object(&self, id: ObjId) -> AioResult<()> {
        let obj = self.arena.get(id).ok_or(AioError::UnknownObject)?;
        if !obj.killed.swap(true, Ordering::SeqCst) {
            kdebug!("kill {}", id);
            self.backend.cancel(id);
            self.backend.wake();
        }
        Ok(())
    }

    /// Resolve an object for timeout configuration or inspection.
    pub fn object(&self, id: ObjId) -> AioResult<Arc<AsyncObject>> {
        self.arena.get(id).ok_or(AioError::UnknownObject)
    }

    pub(crate) fn arena_get(&self, id: ObjId) -> Option<Arc<AsyncObject>> {
        self.arena.get(id)
    }

    pub fn set_timeout(&self, id: ObjId, class: OpClass, ms: u64) -> AioResult<()> {
        self.object(id)?.set_timeout_ms(class, ms);
        Ok(())
    }

    pub fn timeout(&self, id: ObjId, class: OpClass) -> AioResult<u64> {
        Ok(self.object(id)?.timeout_ms(class))
    }

    // ── Engine lifecycle ──

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Idempotent. Wakes every worker so a thread parked in the backend
    /// re-checks the flag promptly instead of waiting out its timeout.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        kinfo!("kill requested");
        let workers = self.active_workers.load(Ordering::SeqCst).max(1);
        for _ in 0..workers {
            self.backend.wake();
        }
    }

    /// Kill, wait (bounded) for workers to leave, make sure the drain ran,
    /// and shut the backend down. Not safe to call concurrently with
    /// submissions.
    pub fn exit(&self) {
        self.kill();
        let mut polls = 0u32;
        while self.active_workers.load(Ordering::SeqCst) > 0 {
            if polls >= self.config.remove_retries {
                kwarn!(
                    "exit: {} workers still active",
                    self.active_workers.load(Ordering::SeqCst)
                );
                break;
            }
            polls += 1;
            thread::sleep(Duration::from_millis(1));
        }
        self.drain_after_kill();
        self.backend.shutdown();
        kinfo!("exit complete");
    }

    pub fn stats(&self) -> ProactorStats {
        ProactorStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            callbacks: self.counters.callbacks.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            killed: self.counters.killed_ops.load(Ordering::Relaxed),
            objects: self.arena.len(),
            active_workers: self.active_workers.load(Ordering::Relaxed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    // ── Worker loop ──

    /// Run until `kill()`. Call from one or more dedicated threads.
    pub fn run_loop(&self) {
        self.run_loop_until(|| false)
    }

    /// Run until `kill()` or `stop()` returns true.
    pub fn run_loop_until<F: Fn() -> bool>(&self, stop: F) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        kdebug!("worker started");
        while !self.is_killed() && !stop() {
            if !self.iteration() {
                break;
            }
        }
        let remaining = self.active_workers.fetch_sub(1, Ordering::SeqCst) - 1;
        kdebug!("worker stopped ({} remaining)", remaining);
        if self.is_killed() && remaining == 0 {
            self.drain_after_kill();
        }
    }

    /// Spawn `n` worker threads running `run_loop`.
    pub fn spawn_workers(self: &Arc<Self>, n: usize) -> Vec<thread::JoinHandle<()>> {
        (0..n)
            .map(|i| {
                let p = Arc::clone(self);
                thread::Builder::new()
                    .name(format!("paio-worker-{}", i))
                    .spawn(move || p.run_loop())
                    .expect("failed to spawn worker thread")
            })
            .collect()
    }

    /// One worker iteration. Returns false on an unrecoverable backend
    /// fault — that worker's loop ends; the engine does not panic.
    fn iteration(&self) -> bool {
        self.pump_submissions();

        let mut completed = Vec::with_capacity(64);
        if let Err(e) = self.backend.wait(self.wait_budget(), &mut completed) {
            kerror!("backend wait failed: {} — worker loop stops", e);
            return false;
        }

        self.advance_timers();

        for c in completed {
            self.deliver(c.event, Disposition::Bucket(c.bucket));
        }
        true
    }

    fn pump_submissions(&self) {
        for _ in 0..SUBMIT_BATCH {
            let Some(event) = self.high.pop().or_else(|| self.low.pop()) else {
                break;
            };
            self.hand_to_backend(event);
        }
    }

    /// Arm the per-op timeout and pass the event to the backend. A hard
    /// local rejection still produces the exactly-once terminal callback.
    fn hand_to_backend(&self, event: Box<CompletionEvent>) {
        if let Some(obj) = self.arena.get(event.obj) {
            if obj.is_killed() {
                self.deliver(event, Disposition::Forced(OpState::Killed, 0));
                return;
            }
            if let Some(class) = event.op.class() {
                let ms = obj.timeout_ms(class);
                if ms > 0 {
                    let h = self
                        .coarse
                        .schedule_in(Duration::from_millis(ms), TimerAction::CancelOp(event.obj));
                    obj.timeout_timer.store(h.0, Ordering::Release);
                }
            }
        }
        match self.backend.submit(event) {
            Ok(()) => {}
            Err((event, err)) => {
                kdebug!("backend rejected {}: {}", event.op, err);
                let errno = match err {
                    AioError::BackendSubmit(e) | AioError::Os(e) => e,
                    _ => 0,
                };
                self.deliver(event, Disposition::Forced(OpState::Failed, errno));
            }
        }
    }

    /// How long the next `wait` may block: capped, shortened to the
    /// nearest timer deadline, zero while lane work is queued.
    fn wait_budget(&self) -> Duration {
        if !self.high.is_empty() || !self.low.is_empty() {
            return Duration::ZERO;
        }
        let now = Instant::now();
        let mut budget = self.config.max_wait;
        for deadline in [self.precise.next_deadline(), self.coarse.next_deadline()] {
            if let Some(d) = deadline {
                budget = budget.min(d.saturating_duration_since(now));
            }
        }
        budget
    }

    fn advance_timers(&self) {
        let now = Instant::now();
        let mut actions = self.precise.advance(now);
        actions.extend(self.coarse.advance(now));
        for action in actions {
            match action {
                TimerAction::Submit(event) => self.hand_to_backend(event),
                TimerAction::Complete(event) => {
                    self.deliver(event, Disposition::Forced(OpState::Ok, 0))
                }
                TimerAction::CancelOp(id) => {
                    if let Some(obj) = self.arena.get(id) {
                        if obj.pending.load(Ordering::Acquire) {
                            obj.timed_out.store(true, Ordering::Release);
                            self.backend.cancel(id);
                        }
                    }
                }
            }
        }
    }

    // ── Delivery ──

    fn deliver(&self, mut event: Box<CompletionEvent>, disposition: Disposition) {
        let Some(obj) = self.arena.get(event.obj) else {
            // Internal invariant violation: fatal to this iteration only.
            kerror!("completion for unknown object {} ({})", event.obj, event.op);
            return;
        };

        // The op is done; its timeout task must not fire later.
        let th = obj.timeout_timer.swap(0, Ordering::AcqRel);
        if th != 0 {
            self.coarse.cancel(TimerHandle(th));
        }

        match disposition {
            Disposition::Bucket(bucket) => {
                let timed_out = obj.timed_out.load(Ordering::Acquire);
                let c = classify(event.op, bucket, timed_out);
                event.state = c.state;
                event.result.bytes = c.bytes;
                event.result.errno = c.errno;
            }
            Disposition::Forced(state, errno) => {
                event.state = state;
                event.result.errno = errno;
            }
        }

        // Kill override: a completion racing a kill never reports success
        // on a dead object.
        if obj.is_killed() {
            event.state = OpState::Killed;
        }

        match event.state {
            OpState::Timeout => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            OpState::Killed => {
                self.counters.killed_ops.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        self.finish(&obj, event);
    }

    /// Clear pending, run the callback, re-arm accepts that asked for it.
    ///
    /// Pending clears before the callback so the callback can chain the
    /// next operation on the same object.
    fn finish(&self, obj: &Arc<AsyncObject>, event: Box<CompletionEvent>) {
        obj.clear_pending();
        obj.calling.store(true, Ordering::Release);
        let action = event.invoke();
        obj.calling.store(false, Ordering::Release);

        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.counters.callbacks.fetch_add(1, Ordering::Relaxed);

        if event.op == OpCode::Accept
            && event.state == OpState::Ok
            && action == CallbackAction::Continue
            && !obj.is_killed()
            && !self.is_killed()
        {
            let again =
                CompletionEvent::new(event.obj, OpParams::Accept, Arc::clone(&event.callback));
            if let Err(e) = self.enqueue(obj, again, None) {
                kdebug!("accept re-arm on {} failed: {}", event.obj, e.error);
            }
        }
    }

    // ── Submission core ──

    /// Validate, claim the object's single pending slot, and route: to the
    /// precise timer (run-task), the coarse timer (deferred), or a lane.
    pub(crate) fn enqueue(
        &self,
        obj: &Arc<AsyncObject>,
        event: Box<CompletionEvent>,
        delay: Option<Duration>,
    ) -> Result<(), SubmitError> {
        if self.is_killed() {
            return Err(SubmitError::new(AioError::EngineKilled, take_params(event)));
        }
        if obj.is_killed() {
            return Err(SubmitError::new(AioError::ObjectKilled, take_params(event)));
        }
        if let Err(what) = event.params.validate() {
            return Err(SubmitError::new(
                AioError::InvalidArgument(what),
                take_params(event),
            ));
        }
        if !obj.try_acquire_pending() {
            return Err(SubmitError::new(
                AioError::AlreadyPending,
                take_params(event),
            ));
        }
        obj.timed_out.store(false, Ordering::Release);

        let run_task_deadline = match &event.params {
            OpParams::RunTask { deadline } => Some(*deadline),
            _ => None,
        };

        if let Some(delay) = delay {
            self.coarse.schedule_in(delay, TimerAction::Submit(event));
        } else if let Some(deadline) = run_task_deadline {
            // Pure scheduled callback: never touches the backend.
            self.precise.schedule_at(deadline, TimerAction::Complete(event));
        } else {
            let lane = if event.op.high_priority() {
                &self.high
            } else {
                &self.low
            };
            if let Err(event) = lane.push(event) {
                obj.clear_pending();
                return Err(SubmitError::new(AioError::QueueFull, take_params(event)));
            }
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.backend.wake();
        Ok(())
    }

    // ── Kill drain ──

    /// Runs exactly once, on the last worker out (or in `exit`): everything
    /// accepted before the kill still gets its terminal callback.
    fn drain_after_kill(&self) {
        if self.drained.swap(true, Ordering::SeqCst) {
            return;
        }

        // 1. Queued but never submitted.
        while let Some(event) = self.high.pop().or_else(|| self.low.pop()) {
            self.deliver(event, Disposition::Forced(OpState::Killed, 0));
        }

        // 2. Parked in either timer.
        let mut actions = self.precise.drain_all();
        actions.extend(self.coarse.drain_all());
        for action in actions {
            match action {
                TimerAction::Submit(event) | TimerAction::Complete(event) => {
                    self.deliver(event, Disposition::Forced(OpState::Killed, 0));
                }
                TimerAction::CancelOp(_) => {}
            }
        }

        // 3. In flight at the backend: cancel everything, then reap with a
        //    bounded budget.
        self.arena.for_each(|obj| {
            obj.killed.store(true, Ordering::SeqCst);
            self.backend.cancel(obj.id());
        });

        let mut idle_polls = 0u32;
        let mut out = Vec::new();
        while self.backend.inflight() > 0 && idle_polls < 1000 {
            out.clear();
            if self.backend.wait(Duration::from_millis(1), &mut out).is_err() {
                break;
            }
            if out.is_empty() {
                idle_polls += 1;
            }
            for c in out.drain(..) {
                self.deliver(c.event, Disposition::Bucket(c.bucket));
            }
        }
        let left = self.backend.inflight();
        if left > 0 {
            kwarn!("kill drain abandoned {} in-flight operations", left);
        }
        kinfo!("kill drain complete");
    }
}

fn take_params(event: Box<CompletionEvent>) -> OpParams {
    let CompletionEvent { params, .. } = *event;
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use paio_core::backend::{Completed, SubmitRejected};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Condvar, Mutex};

    // ── A deterministic in-process backend ──
    //
    // Lets the engine-level properties (exactly-once, backpressure, kill
    // drain, run-task timing) hold on any kernel.

    #[derive(Clone, Copy)]
    enum StubMode {
        /// Submitted operations park until cancelled.
        Hang,
        /// Submitted operations complete with this raw result on the next
        /// wait.
        Instant(i64),
    }

    struct StubInner {
        hanging: HashMap<u32, Box<CompletionEvent>>,
        ready: Vec<Completed>,
        wakes: usize,
    }

    struct StubBackend {
        mode: StubMode,
        inner: Mutex<StubInner>,
        cv: Condvar,
    }

    impl StubBackend {
        fn new(mode: StubMode) -> Self {
            Self {
                mode,
                inner: Mutex::new(StubInner {
                    hanging: HashMap::new(),
                    ready: Vec::new(),
                    wakes: 0,
                }),
                cv: Condvar::new(),
            }
        }
    }

    impl IoBackend for StubBackend {
        fn bind(&self, _obj: ObjId, _handle: RawFd, _kind: ObjectKind) -> AioResult<()> {
            Ok(())
        }

        fn unbind(&self, _obj: ObjId) {}

        fn cancel(&self, obj: ObjId) {
            let mut inner = self.inner.lock().unwrap();
            if let Some(event) = inner.hanging.remove(&obj.index) {
                inner.ready.push(Completed {
                    event,
                    bucket: RawBucket::Cancelled,
                });
                self.cv.notify_all();
            }
        }

        fn submit(&self, event: Box<CompletionEvent>) -> Result<(), SubmitRejected> {
            let mut inner = self.inner.lock().unwrap();
            match self.mode {
                StubMode::Hang => {
                    inner.hanging.insert(event.obj.index, event);
                }
                StubMode::Instant(raw) => {
                    inner.ready.push(Completed {
                        event,
                        bucket: RawBucket::from_raw(raw),
                    });
                }
            }
            self.cv.notify_all();
            Ok(())
        }

        fn wait(&self, timeout: Duration, out: &mut Vec<Completed>) -> AioResult<usize> {
            let mut inner = self.inner.lock().unwrap();
            if inner.ready.is_empty() && inner.wakes == 0 && !timeout.is_zero() {
                let (guard, _) = self.cv.wait_timeout(inner, timeout).unwrap();
                inner = guard;
            }
            inner.wakes = 0;
            let n = inner.ready.len();
            out.append(&mut inner.ready);
            Ok(n)
        }

        fn wake(&self) {
            let mut inner = self.inner.lock().unwrap();
            inner.wakes += 1;
            self.cv.notify_all();
        }

        fn inflight(&self) -> usize {
            let inner = self.inner.lock().unwrap();
            inner.hanging.len() + inner.ready.len()
        }

        fn shutdown(&self) {}
    }

    fn stub_proactor(mode: StubMode) -> Arc<Proactor> {
        Arc::new(Proactor::with_backend(
            ProactorConfig::new(16)
                .queue_depth(8)
                .tick(Duration::from_millis(5))
                .max_wait(Duration::from_millis(10))
                .remove_retries(50),
            Box::new(StubBackend::new(mode)),
        ))
    }

    fn wait_until(mut cond: impl FnMut() -> bool, budget_ms: u64) -> bool {
        for _ in 0..budget_ms {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn recording_callback(
        log: &Arc<Mutex<Vec<(OpState, usize)>>>,
    ) -> paio_core::event::EventCallback {
        let log = Arc::clone(log);
        Arc::new(move |ev: &CompletionEvent| {
            log.lock().unwrap().push((ev.state, ev.result.bytes));
            CallbackAction::Stop
        })
    }

    #[test]
    fn test_run_task_fires_in_window() {
        let p = stub_proactor(StubMode::Hang);
        let workers = p.spawn_workers(1);
        let task = p.add_object(-1, ObjectKind::Task).unwrap();

        let fired: Arc<Mutex<Vec<(OpState, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let f = Arc::clone(&fired);
        p.submit_run_task(
            task,
            start + Duration::from_millis(50),
            Arc::new(move |ev: &CompletionEvent| {
                f.lock().unwrap().push((ev.state, start.elapsed()));
                CallbackAction::Stop
            }),
        )
        .unwrap();

        assert!(wait_until(|| !fired.lock().unwrap().is_empty(), 2000));
        // Give a hypothetical duplicate delivery time to show up.
        thread::sleep(Duration::from_millis(30));

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        let (state, elapsed) = fired[0];
        assert_eq!(state, OpState::Ok);
        assert!(elapsed >= Duration::from_millis(50), "fired early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1500), "fired late: {:?}", elapsed);

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_recv_timeout_delivers_timeout_state() {
        let p = stub_proactor(StubMode::Hang);
        let workers = p.spawn_workers(1);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();
        p.set_timeout(sock, OpClass::Recv, 30).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_recv(sock, vec![0u8; 8], recording_callback(&log))
            .unwrap();

        assert!(wait_until(|| !log.lock().unwrap().is_empty(), 2000));
        assert_eq!(log.lock().unwrap()[0].0, OpState::Timeout);
        assert_eq!(p.stats().timeouts, 1);

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_kill_object_surfaces_killed() {
        let p = stub_proactor(StubMode::Hang);
        let workers = p.spawn_workers(1);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_recv(sock, vec![0u8; 8], recording_callback(&log))
            .unwrap();
        // Let a worker hand it to the backend first.
        thread::sleep(Duration::from_millis(20));
        p.kill_object(sock).unwrap();
        p.kill_object(sock).unwrap(); // idempotent

        assert!(wait_until(|| !log.lock().unwrap().is_empty(), 2000));
        let state = log.lock().unwrap()[0].0;
        assert!(matches!(state, OpState::Killed | OpState::Failed));
        assert_ne!(state, OpState::Pending);

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_kill_drains_everything_exactly_once() {
        let p = stub_proactor(StubMode::Hang);
        let workers = p.spawn_workers(2);

        let a = p.add_object(-1, ObjectKind::Socket).unwrap();
        let b = p.add_object(-1, ObjectKind::Socket).unwrap();
        let task = p.add_object(-1, ObjectKind::Task).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_recv(a, vec![0u8; 8], recording_callback(&log)).unwrap();
        p.submit_send(b, b"x".to_vec(), recording_callback(&log)).unwrap();
        p.submit_run_task(
            task,
            Instant::now() + Duration::from_secs(3600),
            recording_callback(&log),
        )
        .unwrap();

        // Let the lanes reach the backend, then kill.
        thread::sleep(Duration::from_millis(20));
        p.kill();
        for w in workers {
            w.join().unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3, "each submission completes exactly once");
        for (state, _) in log.iter() {
            assert_eq!(*state, OpState::Killed);
        }
        assert_eq!(p.stats().completed, 3);
    }

    #[test]
    fn test_exit_drains_without_workers() {
        let p = stub_proactor(StubMode::Hang);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_recv(sock, vec![0u8; 8], recording_callback(&log))
            .unwrap();

        p.exit();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, OpState::Killed);
    }

    #[test]
    fn test_backpressure_on_full_lane() {
        // Depth-1 lane, no workers: the second submission must fail fast,
        // not block or crash.
        let p = Proactor::with_backend(
            ProactorConfig::new(16).queue_depth(1).remove_retries(5),
            Box::new(StubBackend::new(StubMode::Hang)),
        );
        let a = p.add_object(-1, ObjectKind::Socket).unwrap();
        let b = p.add_object(-1, ObjectKind::Socket).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_send(a, b"one".to_vec(), recording_callback(&log))
            .unwrap();
        let err = p
            .submit_send(b, b"two".to_vec(), recording_callback(&log))
            .unwrap_err();
        assert_eq!(err.error, AioError::QueueFull);
        match err.params {
            OpParams::Send { buf } => assert_eq!(buf, b"two"),
            other => panic!("buffers not returned: {:?}", other),
        }
        // No callback ever fires for a rejected submission.
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_submission_preconditions() {
        let p = stub_proactor(StubMode::Hang);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Empty buffer is rejected before the pending slot is taken.
        let err = p
            .submit_recv(sock, Vec::new(), recording_callback(&log))
            .unwrap_err();
        assert!(matches!(err.error, AioError::InvalidArgument(_)));

        // Second operation on the same object is a contract violation.
        p.submit_recv(sock, vec![0u8; 8], recording_callback(&log))
            .unwrap();
        let err = p
            .submit_recv(sock, vec![0u8; 8], recording_callback(&log))
            .unwrap_err();
        assert_eq!(err.error, AioError::AlreadyPending);

        // Killed object refuses new work.
        let other = p.add_object(-1, ObjectKind::Socket).unwrap();
        p.kill_object(other).unwrap();
        let err = p
            .submit_recv(other, vec![0u8; 8], recording_callback(&log))
            .unwrap_err();
        assert_eq!(err.error, AioError::ObjectKilled);

        // Unknown object.
        let err = p
            .submit_recv(ObjId::new(99, 1), vec![0u8; 8], recording_callback(&log))
            .unwrap_err();
        assert_eq!(err.error, AioError::UnknownObject);

        // Killed engine refuses everything.
        p.kill();
        let err = p
            .submit_send(sock, b"x".to_vec(), recording_callback(&log))
            .unwrap_err();
        assert_eq!(err.error, AioError::EngineKilled);

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_arena_capacity_bound() {
        let p = Proactor::with_backend(
            ProactorConfig::new(1).remove_retries(5),
            Box::new(StubBackend::new(StubMode::Hang)),
        );
        p.add_object(-1, ObjectKind::Task).unwrap();
        assert!(matches!(
            p.add_object(-1, ObjectKind::Task),
            Err(AioError::AtCapacity)
        ));
    }

    #[test]
    fn test_remove_object_lifecycle() {
        let p = stub_proactor(StubMode::Instant(4));
        let workers = p.spawn_workers(1);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_send(sock, b"data".to_vec(), recording_callback(&log))
            .unwrap();
        assert!(wait_until(|| !log.lock().unwrap().is_empty(), 2000));
        assert_eq!(log.lock().unwrap()[0], (OpState::Ok, 4));

        p.remove_object(sock, false).unwrap();
        assert!(matches!(p.object(sock), Err(AioError::UnknownObject)));
        assert!(matches!(
            p.remove_object(sock, false),
            Err(AioError::UnknownObject)
        ));

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_remove_object_bounded_when_pending() {
        // No workers: the pending op can never finish, so remove must give
        // up within its budget instead of deadlocking.
        let p = stub_proactor(StubMode::Hang);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_recv(sock, vec![0u8; 8], recording_callback(&log))
            .unwrap();

        let start = Instant::now();
        assert!(matches!(
            p.remove_object(sock, false),
            Err(AioError::Busy)
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_accept_continue_resubmits_once_per_verdict() {
        let p = stub_proactor(StubMode::Instant(7));
        let workers = p.spawn_workers(1);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        p.submit_accept(
            sock,
            Arc::new(move |ev: &CompletionEvent| {
                assert_eq!(ev.state, OpState::Ok);
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    CallbackAction::Continue
                } else {
                    CallbackAction::Stop
                }
            }),
        )
        .unwrap();

        assert!(wait_until(|| count.load(Ordering::SeqCst) >= 2, 2000));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 2, "Stop ends the accept chain");

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_submit_after_defers_via_coarse_timer() {
        let p = stub_proactor(StubMode::Instant(3));
        let workers = p.spawn_workers(1);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();

        let fired: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        let start = Instant::now();
        p.submit_send_after(
            sock,
            40,
            b"abc".to_vec(),
            Arc::new(move |ev: &CompletionEvent| {
                assert_eq!(ev.state, OpState::Ok);
                f.lock().unwrap().push(start.elapsed());
                CallbackAction::Stop
            }),
        )
        .unwrap();

        assert!(wait_until(|| !fired.lock().unwrap().is_empty(), 2000));
        let elapsed = fired.lock().unwrap()[0];
        assert!(elapsed >= Duration::from_millis(40), "deferred too little: {:?}", elapsed);

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_chaining_from_callback() {
        // accept → submit the next op from inside the completion callback.
        let p = stub_proactor(StubMode::Instant(1));
        let workers = p.spawn_workers(1);
        let sock = p.add_object(-1, ObjectKind::Socket).unwrap();

        let chained = Arc::new(AtomicUsize::new(0));
        let p2 = Arc::clone(&p);
        let c = Arc::clone(&chained);
        p.submit_send(
            sock,
            b"first".to_vec(),
            Arc::new(move |ev: &CompletionEvent| {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    let c2 = Arc::clone(&c);
                    let ok = p2.submit_send(
                        ev.obj,
                        b"second".to_vec(),
                        Arc::new(move |_ev: &CompletionEvent| {
                            c2.fetch_add(1, Ordering::SeqCst);
                            CallbackAction::Stop
                        }),
                    );
                    assert!(ok.is_ok(), "pending must be clear inside the callback");
                }
                CallbackAction::Stop
            }),
        )
        .unwrap();

        assert!(wait_until(|| chained.load(Ordering::SeqCst) >= 2, 2000));

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
    }

    // ── Real-socket scenarios on the uring backend ──
    //
    // Skip cleanly where the kernel has no io_uring.

    fn uring_proactor() -> Option<Arc<Proactor>> {
        match Proactor::with_config(
            ProactorConfig::new(32)
                .tick(Duration::from_millis(5))
                .max_wait(Duration::from_millis(20)),
        ) {
            Ok(p) => Some(Arc::new(p)),
            Err(e) => {
                eprintln!("skipping uring test: {}", e);
                None
            }
        }
    }

    fn stream_pair() -> (RawFd, RawFd) {
        use std::os::fd::IntoRawFd;
        let (a, b) = nix::sys::socket::socketpair(
            nix::sys::socket::AddressFamily::Unix,
            nix::sys::socket::SockType::Stream,
            None,
            nix::sys::socket::SockFlag::empty(),
        )
        .unwrap();
        (a.into_raw_fd(), b.into_raw_fd())
    }

    #[test]
    fn test_uring_loopback_ping_pong() {
        let Some(p) = uring_proactor() else { return };
        let workers = p.spawn_workers(2);
        let (fa, fb) = stream_pair();
        let a = p.add_object(fa, ObjectKind::Socket).unwrap();
        let b = p.add_object(fb, ObjectKind::Socket).unwrap();

        let got: Arc<Mutex<Option<(OpState, usize, Vec<u8>)>>> = Arc::new(Mutex::new(None));
        let sent: Arc<Mutex<Option<(OpState, usize)>>> = Arc::new(Mutex::new(None));

        let g = Arc::clone(&got);
        p.submit_recv(
            b,
            vec![0u8; 4],
            Arc::new(move |ev: &CompletionEvent| {
                let data = match &ev.params {
                    OpParams::Recv { buf } => buf[..ev.result.bytes].to_vec(),
                    _ => Vec::new(),
                };
                *g.lock().unwrap() = Some((ev.state, ev.result.bytes, data));
                CallbackAction::Stop
            }),
        )
        .unwrap();

        let s = Arc::clone(&sent);
        p.submit_send(
            a,
            b"ping".to_vec(),
            Arc::new(move |ev: &CompletionEvent| {
                *s.lock().unwrap() = Some((ev.state, ev.result.bytes));
                CallbackAction::Stop
            }),
        )
        .unwrap();

        assert!(wait_until(
            || got.lock().unwrap().is_some() && sent.lock().unwrap().is_some(),
            5000
        ));
        let (state, bytes, data) = got.lock().unwrap().take().unwrap();
        assert_eq!(state, OpState::Ok);
        assert_eq!(bytes, 4);
        assert_eq!(data, b"ping");
        let (state, bytes) = sent.lock().unwrap().take().unwrap();
        assert_eq!(state, OpState::Ok);
        assert_eq!(bytes, 4);

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
        p.exit();
    }

    #[test]
    fn test_uring_recv_timeout_window() {
        let Some(p) = uring_proactor() else { return };
        let workers = p.spawn_workers(1);
        let (fa, fb) = stream_pair();
        let a = p.add_object(fa, ObjectKind::Socket).unwrap();
        let _b = p.add_object(fb, ObjectKind::Socket).unwrap();
        p.set_timeout(a, OpClass::Recv, 100).unwrap();

        let log: Arc<Mutex<Vec<(OpState, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let start = Instant::now();
        p.submit_recv(
            a,
            vec![0u8; 16],
            Arc::new(move |ev: &CompletionEvent| {
                l.lock().unwrap().push((ev.state, start.elapsed()));
                CallbackAction::Stop
            }),
        )
        .unwrap();

        assert!(wait_until(|| !log.lock().unwrap().is_empty(), 5000));
        let (state, elapsed) = log.lock().unwrap()[0];
        assert_eq!(state, OpState::Timeout);
        assert!(elapsed >= Duration::from_millis(100), "early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2000), "late: {:?}", elapsed);

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
        p.exit();
    }

    #[test]
    fn test_uring_kill_object_while_recv_pending() {
        let Some(p) = uring_proactor() else { return };
        let workers = p.spawn_workers(1);
        let (fa, fb) = stream_pair();
        let a = p.add_object(fa, ObjectKind::Socket).unwrap();
        let _b = p.add_object(fb, ObjectKind::Socket).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_recv(a, vec![0u8; 16], recording_callback(&log))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        p.kill_object(a).unwrap();

        assert!(wait_until(|| !log.lock().unwrap().is_empty(), 5000));
        let state = log.lock().unwrap()[0].0;
        assert!(
            matches!(state, OpState::Killed | OpState::Failed),
            "got {:?}",
            state
        );

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
        p.exit();
    }

    #[test]
    fn test_uring_sendfile_reports_not_supported() {
        let Some(p) = uring_proactor() else { return };
        let workers = p.spawn_workers(1);
        let (fa, fb) = stream_pair();
        let a = p.add_object(fa, ObjectKind::Socket).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        p.submit_send_file(a, fb, 0, 64, recording_callback(&log))
            .unwrap();

        assert!(wait_until(|| !log.lock().unwrap().is_empty(), 5000));
        assert_eq!(log.lock().unwrap()[0].0, OpState::NotSupported);

        p.kill();
        for w in workers {
            w.join().unwrap();
        }
        unsafe {
            libc::close(fb);
        }
        p.exit();
    }
}
