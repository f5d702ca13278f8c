//! Raw-result buckets and the table-driven completion classifier.
//!
//! A backend never decides terminal states. It reduces whatever its OS
//! facility reported to a `RawBucket`; `classify` turns (opcode, bucket)
//! into the terminal state using the static opcode table. This is the one
//! place mapping platform results to engine states — a new backend only
//! supplies buckets.
//!
//! The kill override (object already killed ⇒ forced `Killed`) is applied
//! by the worker loop after classification, so a completion racing a kill
//! never reports `Ok` on a dead object.

use crate::op::{OpCode, OpState};

/// Platform-independent reduction of one raw OS completion result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawBucket {
    /// Operation finished; payload is the non-negative transfer count
    /// (or accepted fd, which the backend decodes separately).
    Done(i64),
    /// The operation was cancelled (kill or timeout — the classifier
    /// decides which from the object's timeout flag).
    Cancelled,
    /// The backend cannot perform this opcode at all.
    Unsupported,
    /// Hard failure with errno.
    Error(i32),
}

impl RawBucket {
    /// Reduce a negative-errno style result (the io_uring/syscall
    /// convention: >= 0 success, < 0 is -errno).
    pub fn from_raw(raw: i64) -> Self {
        if raw >= 0 {
            return RawBucket::Done(raw);
        }
        let errno = (-raw) as i32;
        match errno {
            e if e == ecanceled() => RawBucket::Cancelled,
            e if e == enosys() || e == eopnotsupp() => RawBucket::Unsupported,
            e => RawBucket::Error(e),
        }
    }
}

// Avoid a libc dependency in this crate for three constants that are
// identical across the platforms we target.
const fn ecanceled() -> i32 {
    125
}
const fn enosys() -> i32 {
    38
}
const fn eopnotsupp() -> i32 {
    95
}

/// Classifier output: terminal state plus decoded transfer count/errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub state: OpState,
    pub bytes: usize,
    pub errno: i32,
}

/// Map one completed operation to its terminal state.
///
/// `timed_out` is the object's flag set by the coarse timer before it
/// requested cancellation; it disambiguates the two cancellation causes.
pub fn classify(op: OpCode, bucket: RawBucket, timed_out: bool) -> Classified {
    match bucket {
        RawBucket::Done(n) => {
            if n == 0 && op.closable_on_zero() {
                Classified {
                    state: OpState::Closed,
                    bytes: 0,
                    errno: 0,
                }
            } else {
                Classified {
                    state: OpState::Ok,
                    bytes: n.max(0) as usize,
                    errno: 0,
                }
            }
        }
        RawBucket::Cancelled => Classified {
            state: if timed_out {
                OpState::Timeout
            } else {
                OpState::Killed
            },
            bytes: 0,
            errno: ecanceled(),
        },
        RawBucket::Unsupported => Classified {
            state: OpState::NotSupported,
            bytes: 0,
            errno: enosys(),
        },
        RawBucket::Error(e) => Classified {
            state: OpState::Failed,
            bytes: 0,
            errno: e,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_from_raw() {
        assert_eq!(RawBucket::from_raw(42), RawBucket::Done(42));
        assert_eq!(RawBucket::from_raw(0), RawBucket::Done(0));
        assert_eq!(RawBucket::from_raw(-125), RawBucket::Cancelled);
        assert_eq!(RawBucket::from_raw(-38), RawBucket::Unsupported);
        assert_eq!(RawBucket::from_raw(-95), RawBucket::Unsupported);
        assert_eq!(RawBucket::from_raw(-104), RawBucket::Error(104));
    }

    #[test]
    fn test_success_with_bytes() {
        let c = classify(OpCode::Recv, RawBucket::Done(512), false);
        assert_eq!(c.state, OpState::Ok);
        assert_eq!(c.bytes, 512);
    }

    #[test]
    fn test_zero_bytes_closes_stream_ops() {
        assert_eq!(
            classify(OpCode::Recv, RawBucket::Done(0), false).state,
            OpState::Closed
        );
        assert_eq!(
            classify(OpCode::FileRead, RawBucket::Done(0), false).state,
            OpState::Closed
        );
        // Connect completing with 0 is plain success.
        assert_eq!(
            classify(OpCode::Connect, RawBucket::Done(0), false).state,
            OpState::Ok
        );
        // Zero-length datagrams are data, not close.
        assert_eq!(
            classify(OpCode::RecvFrom, RawBucket::Done(0), false).state,
            OpState::Ok
        );
    }

    #[test]
    fn test_cancellation_causes() {
        assert_eq!(
            classify(OpCode::Recv, RawBucket::Cancelled, true).state,
            OpState::Timeout
        );
        assert_eq!(
            classify(OpCode::Recv, RawBucket::Cancelled, false).state,
            OpState::Killed
        );
    }

    #[test]
    fn test_unsupported_and_failed() {
        assert_eq!(
            classify(OpCode::SendFile, RawBucket::Unsupported, false).state,
            OpState::NotSupported
        );
        let c = classify(OpCode::Send, RawBucket::Error(32), false);
        assert_eq!(c.state, OpState::Failed);
        assert_eq!(c.errno, 32);
    }
}
