//! PAIO End-to-End Smoke Test
//!
//! Exercises the whole engine against a live kernel:
//!   Part A — Engine basics: run-task timing, validation, backpressure
//!   Part B — Socket I/O: loopback ping-pong, vectored send, timeout, kill
//!   Part C — File I/O: positioned write/read, fsync
//!
//! Run: ./target/release/paio-smoke
//! Exits 0 when every check passes (or io_uring is unavailable), 1 otherwise.

use std::os::fd::IntoRawFd;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use paio::{
    AioError, CallbackAction, CompletionEvent, ObjId, ObjectKind, OpClass, OpParams, OpState,
    Proactor, ProactorConfig,
};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
        }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.total += 1;
        if ok {
            self.passed += 1;
            println!("  [{:2}] {:<52} PASS", self.total, name);
        } else {
            self.failed += 1;
            println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
        }
    }

    fn summary(&self) -> bool {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
        self.failed == 0
    }
}

/// Callback that records (state, bytes) and a copy of any received data.
type Record = Arc<Mutex<Vec<(OpState, usize, Vec<u8>)>>>;

fn recorder(rec: &Record) -> paio::EventCallback {
    let rec = Arc::clone(rec);
    Arc::new(move |ev: &CompletionEvent| {
        let data = match &ev.params {
            OpParams::Recv { buf } | OpParams::FileRead { buf, .. } => {
                buf[..ev.result.bytes.min(buf.len())].to_vec()
            }
            _ => Vec::new(),
        };
        rec.lock().unwrap().push((ev.state, ev.result.bytes, data));
        CallbackAction::Stop
    })
}

fn wait_for(rec: &Record, n: usize, budget: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < budget {
        if rec.lock().unwrap().len() >= n {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    rec.lock().unwrap().len() >= n
}

fn stream_pair() -> (RawFd, RawFd) {
    let (a, b) = nix::sys::socket::socketpair(
        nix::sys::socket::AddressFamily::Unix,
        nix::sys::socket::SockType::Stream,
        None,
        nix::sys::socket::SockFlag::empty(),
    )
    .expect("socketpair failed");
    (a.into_raw_fd(), b.into_raw_fd())
}

// ── Part A: engine basics ──

fn test_engine(t: &mut TestRunner, p: &Arc<Proactor>) {
    t.section("Part A: Engine basics");

    // Run-task timing window.
    let task = p.add_object(-1, ObjectKind::Task).unwrap();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::clone(&fired);
    let start = Instant::now();
    p.submit_run_task(
        task,
        start + Duration::from_millis(50),
        Arc::new(move |ev: &CompletionEvent| {
            f.lock().unwrap().push((ev.state, start.elapsed()));
            CallbackAction::Stop
        }),
    )
    .unwrap();
    let ok = {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if !fired.lock().unwrap().is_empty() {
                break true;
            }
            if Instant::now() > deadline {
                break false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    };
    let (state, elapsed) = if ok {
        fired.lock().unwrap()[0]
    } else {
        (OpState::Pending, Duration::ZERO)
    };
    t.check(
        "run-task fires once, not early",
        ok && state == OpState::Ok && elapsed >= Duration::from_millis(50),
        &format!("state={:?} elapsed={:?}", state, elapsed),
    );

    // Validation: empty buffer rejected, no callback.
    let sock = p.add_object(-1, ObjectKind::Task).unwrap();
    let rec: Record = Arc::new(Mutex::new(Vec::new()));
    let err = p.submit_recv(sock, Vec::new(), recorder(&rec)).unwrap_err();
    t.check(
        "empty buffer rejected synchronously",
        matches!(err.error, AioError::InvalidArgument(_)) && rec.lock().unwrap().is_empty(),
        &format!("{}", err.error),
    );

    // Unknown object.
    let err = p
        .submit_recv(ObjId::new(9999, 1), vec![0u8; 4], recorder(&rec))
        .unwrap_err();
    t.check(
        "stale object id rejected",
        err.error == AioError::UnknownObject,
        &format!("{}", err.error),
    );

    let _ = p.remove_object(task, false);
    let _ = p.remove_object(sock, false);
}

// ── Part B: socket I/O ──

fn test_sockets(t: &mut TestRunner, p: &Arc<Proactor>) {
    t.section("Part B: Socket I/O (loopback)");

    // Ping-pong.
    let (fa, fb) = stream_pair();
    let a = p.add_object(fa, ObjectKind::Socket).unwrap();
    let b = p.add_object(fb, ObjectKind::Socket).unwrap();

    let got: Record = Arc::new(Mutex::new(Vec::new()));
    let sent: Record = Arc::new(Mutex::new(Vec::new()));
    p.submit_recv(b, vec![0u8; 4], recorder(&got)).unwrap();
    p.submit_send(a, b"ping".to_vec(), recorder(&sent)).unwrap();

    let ok = wait_for(&got, 1, Duration::from_secs(3)) && wait_for(&sent, 1, Duration::from_secs(3));
    let (rs, rb, rd) = if ok {
        got.lock().unwrap()[0].clone()
    } else {
        (OpState::Pending, 0, Vec::new())
    };
    t.check(
        "recv gets ping (state=Ok bytes=4)",
        ok && rs == OpState::Ok && rb == 4 && rd == b"ping",
        &format!("state={:?} bytes={}", rs, rb),
    );
    let (ss, sb, _) = if ok {
        sent.lock().unwrap()[0].clone()
    } else {
        (OpState::Pending, 0, Vec::new())
    };
    t.check(
        "send completes (state=Ok bytes=4)",
        ok && ss == OpState::Ok && sb == 4,
        &format!("state={:?} bytes={}", ss, sb),
    );

    // Vectored send arrives coalesced.
    let got2: Record = Arc::new(Mutex::new(Vec::new()));
    p.submit_recv(b, vec![0u8; 8], recorder(&got2)).unwrap();
    let sent2: Record = Arc::new(Mutex::new(Vec::new()));
    p.submit_send_vector(a, vec![b"abc".to_vec(), b"defg".to_vec()], recorder(&sent2))
        .unwrap();
    let ok = wait_for(&got2, 1, Duration::from_secs(3));
    let (vs, vb, vd) = if ok {
        got2.lock().unwrap()[0].clone()
    } else {
        (OpState::Pending, 0, Vec::new())
    };
    t.check(
        "vectored send delivers 7 bytes",
        ok && vs == OpState::Ok && vb == 7 && vd == b"abcdefg",
        &format!("state={:?} bytes={}", vs, vb),
    );

    // Recv timeout on a silent peer.
    p.set_timeout(a, OpClass::Recv, 100).unwrap();
    let timed: Record = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();
    p.submit_recv(a, vec![0u8; 16], recorder(&timed)).unwrap();
    let ok = wait_for(&timed, 1, Duration::from_secs(3));
    let elapsed = start.elapsed();
    let state = if ok {
        timed.lock().unwrap()[0].0
    } else {
        OpState::Pending
    };
    t.check(
        "recv timeout in [100ms, +slack]",
        ok && state == OpState::Timeout && elapsed >= Duration::from_millis(100),
        &format!("state={:?} elapsed={:?}", state, elapsed),
    );

    // Kill while pending.
    let killed: Record = Arc::new(Mutex::new(Vec::new()));
    p.submit_recv(b, vec![0u8; 16], recorder(&killed)).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    p.kill_object(b).unwrap();
    let ok = wait_for(&killed, 1, Duration::from_secs(3));
    let state = if ok {
        killed.lock().unwrap()[0].0
    } else {
        OpState::Pending
    };
    t.check(
        "kill surfaces terminal state",
        ok && matches!(state, OpState::Killed | OpState::Failed),
        &format!("state={:?}", state),
    );

    let _ = p.remove_object(a, false);
    let _ = p.remove_object(b, false);
}

// ── Part C: file I/O ──

fn test_files(t: &mut TestRunner, p: &Arc<Proactor>) {
    t.section("Part C: File I/O");

    let path = std::env::temp_dir().join(format!("paio-smoke-{}.dat", std::process::id()));
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .expect("temp file");
    let obj = p
        .add_object(file.into_raw_fd(), ObjectKind::File)
        .unwrap();

    // Positioned write, then sync, then positioned read-back.
    let wrote: Record = Arc::new(Mutex::new(Vec::new()));
    p.submit_file_write(obj, b"hello-file".to_vec(), Some(0), recorder(&wrote))
        .unwrap();
    let ok = wait_for(&wrote, 1, Duration::from_secs(3));
    let (ws, wb, _) = if ok {
        wrote.lock().unwrap()[0].clone()
    } else {
        (OpState::Pending, 0, Vec::new())
    };
    t.check(
        "file write at offset 0",
        ok && ws == OpState::Ok && wb == 10,
        &format!("state={:?} bytes={}", ws, wb),
    );

    let synced: Record = Arc::new(Mutex::new(Vec::new()));
    p.submit_file_sync(obj, false, recorder(&synced)).unwrap();
    let ok = wait_for(&synced, 1, Duration::from_secs(3));
    let state = if ok {
        synced.lock().unwrap()[0].0
    } else {
        OpState::Pending
    };
    t.check("fsync", ok && state == OpState::Ok, &format!("{:?}", state));

    let read: Record = Arc::new(Mutex::new(Vec::new()));
    p.submit_file_read(obj, vec![0u8; 10], Some(0), recorder(&read))
        .unwrap();
    let ok = wait_for(&read, 1, Duration::from_secs(3));
    let (rs, rb, rd) = if ok {
        read.lock().unwrap()[0].clone()
    } else {
        (OpState::Pending, 0, Vec::new())
    };
    t.check(
        "file read-back matches",
        ok && rs == OpState::Ok && rb == 10 && rd == b"hello-file",
        &format!("state={:?} bytes={}", rs, rb),
    );

    let _ = p.remove_object(obj, false);
    let _ = std::fs::remove_file(&path);
}

// ── Part D: lifecycle ──

fn test_lifecycle(t: &mut TestRunner, p: &Arc<Proactor>) {
    t.section("Part D: Kill drain");

    let count = Arc::new(AtomicUsize::new(0));
    let (fa, fb) = stream_pair();
    let a = p.add_object(fa, ObjectKind::Socket).unwrap();
    let _b = p.add_object(fb, ObjectKind::Socket).unwrap();
    let c = Arc::clone(&count);
    p.submit_recv(
        a,
        vec![0u8; 16],
        Arc::new(move |ev: &CompletionEvent| {
            assert!(ev.state != OpState::Pending);
            c.fetch_add(1, Ordering::SeqCst);
            CallbackAction::Stop
        }),
    )
    .unwrap();

    p.kill();
    let start = Instant::now();
    while count.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(3) {
        std::thread::sleep(Duration::from_millis(1));
    }
    t.check(
        "pending op delivered after kill",
        count.load(Ordering::SeqCst) == 1,
        &format!("callbacks={}", count.load(Ordering::SeqCst)),
    );
}

fn main() {
    let mut t = TestRunner::new();

    let proactor = match Proactor::with_config(
        ProactorConfig::new(256)
            .tick(Duration::from_millis(5))
            .max_wait(Duration::from_millis(20)),
    ) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            println!("paio-smoke: io_uring unavailable ({}), nothing to test", e);
            return;
        }
    };

    let workers = proactor.spawn_workers(2);

    test_engine(&mut t, &proactor);
    test_sockets(&mut t, &proactor);
    test_files(&mut t, &proactor);
    test_lifecycle(&mut t, &proactor);

    proactor.kill();
    for w in workers {
        let _ = w.join();
    }
    proactor.exit();

    let stats = proactor.stats();
    println!(
        "\n  stats: submitted={} completed={} timeouts={} killed={}",
        stats.submitted, stats.completed, stats.timeouts, stats.killed
    );

    if !t.summary() {
        std::process::exit(1);
    }
}
