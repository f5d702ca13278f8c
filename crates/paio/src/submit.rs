//! Per-opcode submission API.
//!
//! Every function has the same shape: validate, claim the object's single
//! pending slot, enqueue, return. `Ok(())` means the outcome will arrive
//! exactly once through the callback; any `Err` means no callback will ever
//! fire and the caller's buffers come back inside the error.
//!
//! The `_after` variants defer the backend hand-off by `delay_ms` via the
//! coarse timer; the operation's own timeout is armed when the hand-off
//! happens, not when the delay starts.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Instant;

use paio_core::error::SubmitError;
use paio_core::event::{CompletionEvent, EventCallback, OpParams};
use paio_core::id::ObjId;

use crate::proactor::Proactor;

type SubmitResult = Result<(), SubmitError>;

impl Proactor {
    fn submit_params(
        &self,
        id: ObjId,
        params: OpParams,
        callback: EventCallback,
        delay_ms: Option<u64>,
    ) -> SubmitResult {
        let Some(obj) = self.arena_get(id) else {
            return Err(SubmitError::new(
                paio_core::error::AioError::UnknownObject,
                params,
            ));
        };
        let event = CompletionEvent::new(id, params, callback);
        self.enqueue(
            &obj,
            event,
            delay_ms.map(std::time::Duration::from_millis),
        )
    }

    /// Wait for an inbound connection. On `Ok`, `result.accepted` holds the
    /// new handle and `result.peer` the remote address. Returning
    /// `CallbackAction::Continue` from the callback re-arms the accept.
    pub fn submit_accept(&self, id: ObjId, callback: EventCallback) -> SubmitResult {
        self.submit_params(id, OpParams::Accept, callback, None)
    }

    pub fn submit_accept_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::Accept, callback, Some(delay_ms))
    }

    /// Connect the object's socket to `addr`.
    pub fn submit_connect(
        &self,
        id: ObjId,
        addr: SocketAddr,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::Connect { addr }, callback, None)
    }

    pub fn submit_connect_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        addr: SocketAddr,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::Connect { addr }, callback, Some(delay_ms))
    }

    /// Receive up to `buf.len()` bytes. `result.bytes` says how many
    /// arrived; zero surfaces as state `Closed`.
    pub fn submit_recv(&self, id: ObjId, buf: Vec<u8>, callback: EventCallback) -> SubmitResult {
        self.submit_params(id, OpParams::Recv { buf }, callback, None)
    }

    pub fn submit_recv_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        buf: Vec<u8>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::Recv { buf }, callback, Some(delay_ms))
    }

    pub fn submit_send(&self, id: ObjId, buf: Vec<u8>, callback: EventCallback) -> SubmitResult {
        self.submit_params(id, OpParams::Send { buf }, callback, None)
    }

    pub fn submit_send_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        buf: Vec<u8>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::Send { buf }, callback, Some(delay_ms))
    }

    /// Datagram receive; `result.peer` carries the sender when the address
    /// family supports it.
    pub fn submit_recv_from(
        &self,
        id: ObjId,
        buf: Vec<u8>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::RecvFrom { buf }, callback, None)
    }

    pub fn submit_recv_from_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        buf: Vec<u8>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::RecvFrom { buf }, callback, Some(delay_ms))
    }

    pub fn submit_send_to(
        &self,
        id: ObjId,
        buf: Vec<u8>,
        addr: SocketAddr,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::SendTo { buf, addr }, callback, None)
    }

    pub fn submit_send_to_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        buf: Vec<u8>,
        addr: SocketAddr,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::SendTo { buf, addr }, callback, Some(delay_ms))
    }

    pub fn submit_recv_vector(
        &self,
        id: ObjId,
        bufs: Vec<Vec<u8>>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::RecvVector { bufs }, callback, None)
    }

    pub fn submit_recv_vector_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        bufs: Vec<Vec<u8>>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::RecvVector { bufs }, callback, Some(delay_ms))
    }

    pub fn submit_send_vector(
        &self,
        id: ObjId,
        bufs: Vec<Vec<u8>>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::SendVector { bufs }, callback, None)
    }

    pub fn submit_send_vector_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        bufs: Vec<Vec<u8>>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::SendVector { bufs }, callback, Some(delay_ms))
    }

    /// Zero-copy file-to-socket transfer. Backends without the facility
    /// deliver `NotSupported`; fall back to read + send.
    pub fn submit_send_file(
        &self,
        id: ObjId,
        src: RawFd,
        offset: u64,
        count: usize,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::SendFile { src, offset, count }, callback, None)
    }

    pub fn submit_send_file_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        src: RawFd,
        offset: u64,
        count: usize,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(
            id,
            OpParams::SendFile { src, offset, count },
            callback,
            Some(delay_ms),
        )
    }

    /// Positioned read when `offset` is set, current-position read otherwise.
    pub fn submit_file_read(
        &self,
        id: ObjId,
        buf: Vec<u8>,
        offset: Option<u64>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::FileRead { buf, offset }, callback, None)
    }

    pub fn submit_file_read_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        buf: Vec<u8>,
        offset: Option<u64>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::FileRead { buf, offset }, callback, Some(delay_ms))
    }

    pub fn submit_file_write(
        &self,
        id: ObjId,
        buf: Vec<u8>,
        offset: Option<u64>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::FileWrite { buf, offset }, callback, None)
    }

    pub fn submit_file_write_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        buf: Vec<u8>,
        offset: Option<u64>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::FileWrite { buf, offset }, callback, Some(delay_ms))
    }

    pub fn submit_file_read_vector(
        &self,
        id: ObjId,
        bufs: Vec<Vec<u8>>,
        offset: Option<u64>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::FileReadVector { bufs, offset }, callback, None)
    }

    pub fn submit_file_read_vector_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        bufs: Vec<Vec<u8>>,
        offset: Option<u64>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(
            id,
            OpParams::FileReadVector { bufs, offset },
            callback,
            Some(delay_ms),
        )
    }

    pub fn submit_file_write_vector(
        &self,
        id: ObjId,
        bufs: Vec<Vec<u8>>,
        offset: Option<u64>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::FileWriteVector { bufs, offset }, callback, None)
    }

    pub fn submit_file_write_vector_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        bufs: Vec<Vec<u8>>,
        offset: Option<u64>,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(
            id,
            OpParams::FileWriteVector { bufs, offset },
            callback,
            Some(delay_ms),
        )
    }

    pub fn submit_file_sync(
        &self,
        id: ObjId,
        data_only: bool,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::FileSync { data_only }, callback, None)
    }

    pub fn submit_file_sync_after(
        &self,
        id: ObjId,
        delay_ms: u64,
        data_only: bool,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::FileSync { data_only }, callback, Some(delay_ms))
    }

    /// Schedule a callback for an absolute deadline. Works on any object,
    /// including `Task` objects with no real handle — it is a pure timer
    /// multiplexed through the same completion path as I/O.
    pub fn submit_run_task(
        &self,
        id: ObjId,
        deadline: Instant,
        callback: EventCallback,
    ) -> SubmitResult {
        self.submit_params(id, OpParams::RunTask { deadline }, callback, None)
    }
}
