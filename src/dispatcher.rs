// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Driver-side dispatcher: validates incoming requests, enforces handle
// ownership, drives the backend, and replies. Ported from gpu-proxy's
// main.c dispatch loop and handlers.c, generalised to the full message
// taxonomy (the original never dispatched GET_INFO/GET_PROPS, and never
// actually returned COPY_D2H data; both gaps are closed here).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::Backend;
use crate::buffer::IpcBuffer;
use crate::handle_table::HandleTable;
use crate::transport::Connection;
use crate::wire::{
    AllocReq, CopyD2dReq, CopyD2hReq, CopyH2dHeader, FreeReq, GetInfoReq, IdmErrorCode, MemsetReq,
    Message, MsgType, ResponseError, ResponseOkHeader, SyncReq,
};

/// Checked before any backend call that touches allocation bytes, so an
/// out-of-bounds request never reaches the backend at all.
fn check_bounds(alloc_size: u64, offset: u64, len: u64) -> Result<(), IdmErrorCode> {
    match offset.checked_add(len) {
        Some(end) if end <= alloc_size => Ok(()),
        _ => Err(IdmErrorCode::InvalidSize),
    }
}

/// Dispatcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Init,
    Ready,
    Running,
    Draining,
    Stopped,
}

/// Driver-side request dispatcher for a single zone connection.
pub struct Dispatcher<B: Backend> {
    conn: Connection,
    backend: Arc<B>,
    handles: Arc<HandleTable>,
    state: DispatcherState,
    running: Arc<AtomicBool>,
}

impl<B: Backend> Dispatcher<B> {
    pub fn new(conn: Connection, backend: Arc<B>, handles: Arc<HandleTable>) -> Self {
        Self { conn, backend, handles, state: DispatcherState::Init, running: Arc::new(AtomicBool::new(false)) }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn local_zone(&self) -> u32 {
        self.conn.local_zone()
    }

    /// Receive the next message on this dispatcher's connection directly,
    /// for callers driving [`dispatch_one`] by hand instead of [`run`].
    ///
    /// [`dispatch_one`]: Dispatcher::dispatch_one
    /// [`run`]: Dispatcher::run
    pub fn recv(&self, timeout_ms: u64) -> std::io::Result<Option<Message>> {
        self.conn.recv(timeout_ms)
    }

    /// A clonable flag the caller can use to request a cooperative stop
    /// from another thread.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Request that [`run`] return after finishing its current iteration.
    ///
    /// [`run`]: Dispatcher::run
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Drive the dispatch loop: INIT -> READY -> RUNNING -> DRAINING -> STOPPED.
    /// `recv_timeout_ms` bounds how long each iteration waits for a message
    /// before checking the cancellation flag again.
    pub fn run(&mut self, recv_timeout_ms: u64) -> std::io::Result<()> {
        self.state = DispatcherState::Ready;
        self.running.store(true, Ordering::SeqCst);
        self.state = DispatcherState::Running;

        while self.running.load(Ordering::SeqCst) {
            match self.conn.recv(recv_timeout_ms)? {
                Some(msg) => self.dispatch_one(msg)?,
                None => continue,
            }
        }

        self.state = DispatcherState::Draining;
        for (handle, entry) in self.handles.drain_zone(self.conn.remote_zone()) {
            if let Err(code) = self.backend.free(entry.native_ptr) {
                log::warn!("shutdown: failed to free handle {handle}: {code:?}");
            }
        }
        self.state = DispatcherState::Stopped;
        Ok(())
    }

    /// Handle exactly one already-received message, replying on the
    /// connection. Exposed separately from [`run`] so tests can drive
    /// individual requests without a full loop.
    ///
    /// [`run`]: Dispatcher::run
    pub fn dispatch_one(&self, msg: Message) -> std::io::Result<()> {
        let zone = msg.header.src_zone;
        let seq = msg.header.seq_num;

        // Belt-and-suspenders: `Connection::recv` already drops a message
        // with an invalid header before it reaches here, but `dispatch_one`
        // is public and may be called directly (as our own tests do), so it
        // enforces the same rule. A message this malformed gets no reply.
        if msg.header.validate().is_err() {
            log::warn!("dispatch_one: dropping message from zone {zone} with invalid header");
            return Ok(());
        }
        let msg_type = MsgType::from_u16(msg.header.msg_type).expect("validated above");
        if msg_type.is_response() {
            return self.reply_error(zone, seq, IdmErrorCode::InvalidMessage);
        }

        let result = match msg_type {
            MsgType::Alloc => self.handle_alloc(zone, &msg.payload),
            MsgType::Free => self.handle_free(zone, &msg.payload),
            MsgType::CopyH2D => self.handle_copy_h2d(zone, &msg.payload),
            MsgType::CopyD2H => self.handle_copy_d2h(zone, &msg.payload),
            MsgType::CopyD2D => self.handle_copy_d2d(zone, &msg.payload),
            MsgType::Memset => self.handle_memset(zone, &msg.payload),
            MsgType::Sync => self.handle_sync(zone, &msg.payload),
            MsgType::GetInfo => self.handle_get_info(&msg.payload),
            MsgType::GetProps => self.handle_get_props(&msg.payload),
            MsgType::LaunchKernel => Err(IdmErrorCode::InvalidMessage),
            MsgType::ResponseOk | MsgType::ResponseError => unreachable!("filtered above"),
        };

        match result {
            Ok(data) => self.reply_ok(zone, seq, data),
            Err(code) => self.reply_error(zone, seq, code),
        }
    }

    fn handle_alloc(&self, zone: u32, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let req = AllocReq::decode(payload.data()).map_err(|_| IdmErrorCode::InvalidMessage)?;
        let native_ptr = self.backend.alloc(req.size)?;
        let handle = self.handles.insert(zone, native_ptr, req.size);
        Ok(handle.to_le_bytes().to_vec())
    }

    fn handle_free(&self, zone: u32, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let req = FreeReq::decode(payload.data()).map_err(|_| IdmErrorCode::InvalidMessage)?;
        // Remove from the handle table before touching the backend so a
        // racing operation on the same handle observes it as gone rather
        // than momentarily valid-but-about-to-be-freed.
        let entry = self.handles.remove(req.handle, zone).ok_or(IdmErrorCode::InvalidHandle)?;
        self.backend.free(entry.native_ptr)?;
        Ok(Vec::new())
    }

    fn handle_copy_h2d(&self, zone: u32, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let buf = payload.data();
        let hdr = CopyH2dHeader::decode(buf).map_err(|_| IdmErrorCode::InvalidMessage)?;
        let body = &buf[CopyH2dHeader::WIRE_SIZE..];
        if body.len() as u64 != hdr.len {
            return Err(IdmErrorCode::InvalidMessage);
        }
        let entry = self.handles.lookup(hdr.dst_handle, zone).ok_or(IdmErrorCode::InvalidHandle)?;
        check_bounds(entry.size, hdr.dst_offset, hdr.len)?;
        self.backend.copy_h2d(entry.native_ptr, hdr.dst_offset, body)?;
        Ok(Vec::new())
    }

    fn handle_copy_d2h(&self, zone: u32, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let req = CopyD2hReq::decode(payload.data()).map_err(|_| IdmErrorCode::InvalidMessage)?;
        let entry = self.handles.lookup(req.src_handle, zone).ok_or(IdmErrorCode::InvalidHandle)?;
        check_bounds(entry.size, req.src_offset, req.len)?;
        self.backend.copy_d2h(entry.native_ptr, req.src_offset, req.len)
    }

    fn handle_copy_d2d(&self, zone: u32, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let req = CopyD2dReq::decode(payload.data()).map_err(|_| IdmErrorCode::InvalidMessage)?;
        // Both handles must belong to the requesting zone.
        let dst = self.handles.lookup(req.dst_handle, zone).ok_or(IdmErrorCode::InvalidHandle)?;
        let src = self.handles.lookup(req.src_handle, zone).ok_or(IdmErrorCode::InvalidHandle)?;
        check_bounds(dst.size, req.dst_offset, req.len)?;
        check_bounds(src.size, req.src_offset, req.len)?;
        self.backend.copy_d2d(dst.native_ptr, req.dst_offset, src.native_ptr, req.src_offset, req.len)?;
        Ok(Vec::new())
    }

    fn handle_memset(&self, zone: u32, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let req = MemsetReq::decode(payload.data()).map_err(|_| IdmErrorCode::InvalidMessage)?;
        let entry = self.handles.lookup(req.handle, zone).ok_or(IdmErrorCode::InvalidHandle)?;
        check_bounds(entry.size, req.offset, req.len)?;
        self.backend.memset(entry.native_ptr, req.offset, req.len, req.value)?;
        Ok(Vec::new())
    }

    fn handle_sync(&self, zone: u32, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let req = SyncReq::decode(payload.data()).map_err(|_| IdmErrorCode::InvalidMessage)?;
        let entry = self.handles.lookup(req.handle, zone).ok_or(IdmErrorCode::InvalidHandle)?;
        self.backend.synchronize(entry.native_ptr)?;
        Ok(Vec::new())
    }

    fn handle_get_info(&self, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let req = GetInfoReq::decode(payload.data()).map_err(|_| IdmErrorCode::InvalidMessage)?;
        self.backend.get_info(req.query)
    }

    fn handle_get_props(&self, payload: &IpcBuffer) -> Result<Vec<u8>, IdmErrorCode> {
        let req = GetInfoReq::decode(payload.data()).map_err(|_| IdmErrorCode::InvalidMessage)?;
        self.backend.get_props(req.query)
    }

    fn reply_ok(&self, dst_zone: u32, seq: u64, trailing: Vec<u8>) -> std::io::Result<()> {
        let result = trailing.len() as u64;
        let mut bytes = ResponseOkHeader { result }.encode().to_vec();
        bytes.extend_from_slice(&trailing);
        let msg = Message::new(MsgType::ResponseOk, self.conn.local_zone(), dst_zone, seq, IpcBuffer::from_vec(bytes));
        self.conn.send(&msg, 1000)
    }

    fn reply_error(&self, dst_zone: u32, seq: u64, code: IdmErrorCode) -> std::io::Result<()> {
        log::debug!("request from zone {dst_zone} (seq {seq}) failed: {code:?}");
        let resp = ResponseError::new(seq, code, 0, &format!("{code:?}"));
        let bytes = resp.encode().to_vec();
        let msg = Message::new(MsgType::ResponseError, self.conn.local_zone(), dst_zone, seq, IpcBuffer::from_vec(bytes));
        self.conn.send(&msg, 1000)
    }
}
