//! Opcodes, terminal states, and the per-opcode trait table.
//!
//! `OP_TABLE` is the single place recording static facts about each opcode:
//! which submission lane it prefers, which timeout class governs it, and
//! whether a zero-byte result means the peer closed. Everything else in the
//! engine (routing, timeout arming, result classification) consults this
//! table instead of re-deriving opcode behavior.

/// What kind of OS resource an `AsyncObject` wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Socket,
    File,
    /// No OS handle — a virtual object used purely for scheduled tasks.
    Task,
}

/// One submittable operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Accept = 0,
    Connect,
    Recv,
    Send,
    RecvFrom,
    SendTo,
    RecvVector,
    SendVector,
    SendFile,
    FileRead,
    FileWrite,
    FileReadVector,
    FileWriteVector,
    FileSync,
    RunTask,
}

pub const OP_COUNT: usize = 15;

/// Terminal (and initial) states of a submitted operation.
///
/// `Pending` is the initial state; every accepted submission transitions to
/// exactly one of the terminal states exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Pending,
    Ok,
    Failed,
    Killed,
    Closed,
    Timeout,
    NotSupported,
}

impl OpState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, OpState::Pending)
    }
}

/// Timeout classes an object carries independent settings for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum OpClass {
    Accept = 0,
    Connect,
    Recv,
    Send,
}

impl OpClass {
    pub const COUNT: usize = 4;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Static facts about one opcode.
pub struct OpTraits {
    /// Zero bytes transferred means the peer closed (recv/send family).
    pub closable_on_zero: bool,
    /// Routed through the high-priority submission lane.
    pub high_priority: bool,
    /// Which timeout class governs this opcode, if any.
    pub class: Option<OpClass>,
}

const fn t(closable_on_zero: bool, high_priority: bool, class: Option<OpClass>) -> OpTraits {
    OpTraits {
        closable_on_zero,
        high_priority,
        class,
    }
}

/// Indexed by `OpCode as usize`.
static OP_TABLE: [OpTraits; OP_COUNT] = [
    t(false, true, Some(OpClass::Accept)),  // Accept
    t(false, true, Some(OpClass::Connect)), // Connect
    t(true, false, Some(OpClass::Recv)),    // Recv
    t(true, false, Some(OpClass::Send)),    // Send
    t(false, false, Some(OpClass::Recv)),   // RecvFrom (zero-byte datagrams are legal)
    t(false, false, Some(OpClass::Send)),   // SendTo
    t(true, false, Some(OpClass::Recv)),    // RecvVector
    t(true, false, Some(OpClass::Send)),    // SendVector
    t(true, false, Some(OpClass::Send)),    // SendFile
    t(true, false, None),                   // FileRead (zero bytes = EOF)
    t(false, false, None),                  // FileWrite
    t(true, false, None),                   // FileReadVector
    t(false, false, None),                  // FileWriteVector
    t(false, false, None),                  // FileSync
    t(false, true, None),                   // RunTask
];

impl OpCode {
    #[inline]
    pub fn traits(self) -> &'static OpTraits {
        &OP_TABLE[self as usize]
    }

    #[inline]
    pub fn closable_on_zero(self) -> bool {
        self.traits().closable_on_zero
    }

    #[inline]
    pub fn high_priority(self) -> bool {
        self.traits().high_priority
    }

    #[inline]
    pub fn class(self) -> Option<OpClass> {
        self.traits().class
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Accept => "accept",
            OpCode::Connect => "connect",
            OpCode::Recv => "recv",
            OpCode::Send => "send",
            OpCode::RecvFrom => "recv-from",
            OpCode::SendTo => "send-to",
            OpCode::RecvVector => "recv-vector",
            OpCode::SendVector => "send-vector",
            OpCode::SendFile => "send-file",
            OpCode::FileRead => "file-read",
            OpCode::FileWrite => "file-write",
            OpCode::FileReadVector => "file-read-vector",
            OpCode::FileWriteVector => "file-write-vector",
            OpCode::FileSync => "file-sync",
            OpCode::RunTask => "run-task",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_routing() {
        assert!(OpCode::Accept.high_priority());
        assert!(OpCode::Connect.high_priority());
        assert!(OpCode::RunTask.high_priority());
        assert!(!OpCode::Recv.high_priority());
        assert!(!OpCode::FileWrite.high_priority());
    }

    #[test]
    fn test_timeout_classes() {
        assert_eq!(OpCode::Accept.class(), Some(OpClass::Accept));
        assert_eq!(OpCode::RecvFrom.class(), Some(OpClass::Recv));
        assert_eq!(OpCode::SendVector.class(), Some(OpClass::Send));
        assert_eq!(OpCode::FileSync.class(), None);
        assert_eq!(OpCode::RunTask.class(), None);
    }

    #[test]
    fn test_closable_family() {
        assert!(OpCode::Recv.closable_on_zero());
        assert!(OpCode::FileRead.closable_on_zero());
        // Zero-length datagrams are valid traffic, not a close.
        assert!(!OpCode::RecvFrom.closable_on_zero());
        assert!(!OpCode::Connect.closable_on_zero());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OpState::Pending.is_terminal());
        for s in [
            OpState::Ok,
            OpState::Failed,
            OpState::Killed,
            OpState::Closed,
            OpState::Timeout,
            OpState::NotSupported,
        ] {
            assert!(s.is_terminal());
        }
    }
}
