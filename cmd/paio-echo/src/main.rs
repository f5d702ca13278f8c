//! PAIO Echo Server
//!
//! TCP echo server driven entirely by proactor completions: one standing
//! accept (auto re-armed via `CallbackAction::Continue`), and per
//! connection a recv → send → recv chain where each link is submitted from
//! the previous link's completion callback.
//!
//! Usage:
//!     cargo build --release -p paio-echo
//!     ./target/release/paio-echo [port] [workers]
//!
//! Test with:
//!     echo "hello" | nc localhost 9999
//!     for i in $(seq 1 100); do echo "ping $i" | nc -q0 localhost 9999 & done

use std::net::TcpListener;
use std::os::fd::IntoRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use paio::{
    CallbackAction, CompletionEvent, ObjectKind, OpParams, OpState, Proactor, ProactorConfig,
};

const BUF_SIZE: usize = 4096;

#[derive(Default)]
struct Stats {
    accepts: AtomicU64,
    echoed: AtomicU64,
    closes: AtomicU64,
    errors: AtomicU64,
}

fn main() {
    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().and_then(|a| a.parse().ok()).unwrap_or(9999);
    let workers: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(2);

    let listener = TcpListener::bind(("0.0.0.0", port)).unwrap_or_else(|e| {
        eprintln!("paio-echo: bind failed: {}", e);
        std::process::exit(1);
    });
    eprintln!("paio-echo: listening on port {} ({} workers)", port, workers);

    let proactor = match Proactor::with_config(ProactorConfig::new(4096)) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("paio-echo: proactor setup failed: {}", e);
            std::process::exit(1);
        }
    };
    let stats = Arc::new(Stats::default());

    let handles = proactor.spawn_workers(workers);

    let listen_obj = proactor
        .add_object(listener.into_raw_fd(), ObjectKind::Socket)
        .expect("failed to register listener");

    {
        let p = Arc::clone(&proactor);
        let s = Arc::clone(&stats);
        proactor
            .submit_accept(
                listen_obj,
                Arc::new(move |ev: &CompletionEvent| on_accept(&p, &s, ev)),
            )
            .expect("failed to arm accept");
    }

    // Periodic stats line: a run-task that re-arms itself from its own
    // completion callback (`ev.callback` is the shared callback).
    let ticker = proactor
        .add_object(-1, ObjectKind::Task)
        .expect("failed to add ticker task");
    {
        let p = Arc::clone(&proactor);
        let s = Arc::clone(&stats);
        let start = std::time::Instant::now();
        let tick = std::time::Duration::from_secs(5);
        let cb = Arc::new(move |ev: &CompletionEvent| {
            if ev.state != OpState::Ok {
                return CallbackAction::Stop;
            }
            eprintln!(
                "[{:.1}s] accepts={} echoed={} closes={} errors={}",
                start.elapsed().as_secs_f64(),
                s.accepts.load(Ordering::Relaxed),
                s.echoed.load(Ordering::Relaxed),
                s.closes.load(Ordering::Relaxed),
                s.errors.load(Ordering::Relaxed),
            );
            let _ = p.submit_run_task(
                ev.obj,
                std::time::Instant::now() + tick,
                Arc::clone(&ev.callback),
            );
            CallbackAction::Stop
        });
        proactor
            .submit_run_task(ticker, std::time::Instant::now() + tick, cb)
            .expect("failed to arm stats ticker");
    }

    for h in handles {
        let _ = h.join();
    }
}

fn on_accept(p: &Arc<Proactor>, stats: &Arc<Stats>, ev: &CompletionEvent) -> CallbackAction {
    match ev.state {
        OpState::Ok => {
            stats.accepts.fetch_add(1, Ordering::Relaxed);
            if let Some(fd) = ev.result.accepted {
                start_connection(p, stats, fd);
            }
            CallbackAction::Continue // keep the accept standing
        }
        OpState::Killed => CallbackAction::Stop,
        other => {
            eprintln!("paio-echo: accept failed: {:?}", other);
            stats.errors.fetch_add(1, Ordering::Relaxed);
            CallbackAction::Continue
        }
    }
}

fn start_connection(p: &Arc<Proactor>, stats: &Arc<Stats>, fd: i32) {
    let conn = match p.add_object(fd, ObjectKind::Socket) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("paio-echo: add connection failed: {}", e);
            unsafe {
                libc::close(fd);
            }
            return;
        }
    };
    submit_recv(p, stats, conn, false);
}

fn submit_recv(p: &Arc<Proactor>, stats: &Arc<Stats>, conn: paio::ObjId, in_callback: bool) {
    let p2 = Arc::clone(p);
    let s2 = Arc::clone(stats);
    let res = p.submit_recv(
        conn,
        vec![0u8; BUF_SIZE],
        Arc::new(move |ev: &CompletionEvent| on_recv(&p2, &s2, ev)),
    );
    if let Err(e) = res {
        eprintln!("paio-echo: recv submit failed: {}", e);
        stats.errors.fetch_add(1, Ordering::Relaxed);
        let _ = p.remove_object(conn, in_callback);
    }
}

fn on_recv(p: &Arc<Proactor>, stats: &Arc<Stats>, ev: &CompletionEvent) -> CallbackAction {
    match ev.state {
        OpState::Ok => {
            let data = match &ev.params {
                OpParams::Recv { buf } => buf[..ev.result.bytes].to_vec(),
                _ => return CallbackAction::Stop,
            };
            let p2 = Arc::clone(p);
            let s2 = Arc::clone(stats);
            let res = p.submit_send(
                ev.obj,
                data,
                Arc::new(move |sev: &CompletionEvent| on_send(&p2, &s2, sev)),
            );
            if let Err(e) = res {
                eprintln!("paio-echo: send submit failed: {}", e);
                let _ = p.remove_object(ev.obj, true);
            }
        }
        OpState::Closed | OpState::Killed => {
            stats.closes.fetch_add(1, Ordering::Relaxed);
            let _ = p.remove_object(ev.obj, true);
        }
        _ => {
            stats.errors.fetch_add(1, Ordering::Relaxed);
            let _ = p.remove_object(ev.obj, true);
        }
    }
    CallbackAction::Stop
}

fn on_send(p: &Arc<Proactor>, stats: &Arc<Stats>, ev: &CompletionEvent) -> CallbackAction {
    match ev.state {
        OpState::Ok => {
            stats.echoed.fetch_add(1, Ordering::Relaxed);
            submit_recv(p, stats, ev.obj, true);
        }
        OpState::Closed | OpState::Killed => {
            stats.closes.fetch_add(1, Ordering::Relaxed);
            let _ = p.remove_object(ev.obj, true);
        }
        _ => {
            stats.errors.fetch_add(1, Ordering::Relaxed);
            let _ = p.remove_object(ev.obj, true);
        }
    }
    CallbackAction::Stop
}
