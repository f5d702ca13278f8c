//! PAIO error types.

use std::fmt;

use crate::event::OpParams;

/// Errors surfaced synchronously from the engine's public API.
///
/// Completion-time outcomes (`Failed`, `Timeout`, ...) are never errors —
/// they are delivered through the event's `state` field. Everything here
/// is rejected before any callback could fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioError {
    /// Submission lane is full — backpressure, caller decides.
    QueueFull,
    /// The object already has an operation in flight.
    AlreadyPending,
    /// The object was killed; it accepts no new submissions.
    ObjectKilled,
    /// The engine was killed; it accepts no new submissions.
    EngineKilled,
    /// Object arena is at capacity.
    AtCapacity,
    /// The object id does not resolve (stale generation or never added).
    UnknownObject,
    /// A parameter was rejected before submission (empty buffer, bad fd...).
    InvalidArgument(&'static str),
    /// Backend could not be set up (errno).
    BackendSetup(i32),
    /// Backend rejected the operation locally (errno).
    BackendSubmit(i32),
    /// A bounded retry budget ran out (e.g. removing a busy object).
    Busy,
    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for AioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "submission queue full"),
            Self::AlreadyPending => write!(f, "operation already pending on object"),
            Self::ObjectKilled => write!(f, "object killed"),
            Self::EngineKilled => write!(f, "engine killed"),
            Self::AtCapacity => write!(f, "object arena at capacity"),
            Self::UnknownObject => write!(f, "unknown object"),
            Self::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            Self::BackendSetup(e) => write!(f, "backend setup: errno {}", e),
            Self::BackendSubmit(e) => write!(f, "backend submit: errno {}", e),
            Self::Busy => write!(f, "retry budget exhausted"),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for AioError {}

pub type AioResult<T> = std::result::Result<T, AioError>;

/// Error returned by `submit_*` calls.
///
/// Carries the operation parameters back to the caller so buffers moved
/// into the submission are recovered, never silently dropped.
#[derive(Debug)]
pub struct SubmitError {
    pub error: AioError,
    pub params: OpParams,
}

impl SubmitError {
    pub fn new(error: AioError, params: OpParams) -> Self {
        Self { error, params }
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for SubmitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", AioError::QueueFull), "submission queue full");
        assert_eq!(
            format!("{}", AioError::InvalidArgument("empty buffer")),
            "invalid argument: empty buffer"
        );
        assert_eq!(format!("{}", AioError::Os(11)), "OS error: errno 11");
    }

    #[test]
    fn test_submit_error_returns_params() {
        let err = SubmitError::new(
            AioError::QueueFull,
            OpParams::Send { buf: b"payload".to_vec() },
        );
        match err.params {
            OpParams::Send { buf } => assert_eq!(buf, b"payload"),
            _ => panic!("params lost"),
        }
    }
}
