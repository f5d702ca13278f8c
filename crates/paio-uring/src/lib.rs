//! # paio-uring — the reference `IoBackend`
//!
//! Implements the PAIO backend contract on Linux io_uring: a completion-
//! port-style facility where every submitted operation surfaces exactly
//! once on the completion queue, cancellation is itself asynchronous, and
//! any number of threads may wait concurrently.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod backend;
        pub use backend::{UringBackend, UringConfig};
    } else {
        compile_error!("paio-uring supports Linux (io_uring) only; implement IoBackend for your platform's completion facility");
    }
}
