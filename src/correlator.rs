// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// User-zone request/response correlator: sends a request, waits for the
// response carrying a matching sequence number, and retries on timeout up
// to a bounded number of attempts. Errors reported back across the wire
// are translated into the local error domain, collapsing PERMISSION_DENIED
// into INVALID_HANDLE so a caller on this side can never distinguish
// "wrong owner" from "does not exist", the same closure the dispatcher
// already enforces when it decides what to report in the first place.

use std::io;
use std::time::Duration;

use crate::buffer::IpcBuffer;
use crate::transport::Connection;
use crate::wire::{IdmErrorCode, Message, MsgType, ResponseError, ResponseOkHeader};

/// A successful response: the opaque `result` word plus any trailing data.
#[derive(Debug, Clone)]
pub struct Reply {
    pub result: u64,
    pub data: Vec<u8>,
}

pub struct Correlator<'a> {
    conn: &'a Connection,
    per_attempt_timeout_ms: u64,
    max_attempts: u32,
}

impl<'a> Correlator<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn, per_attempt_timeout_ms: 1000, max_attempts: 10 }
    }

    pub fn with_timeout(mut self, per_attempt: Duration, max_attempts: u32) -> Self {
        self.per_attempt_timeout_ms = per_attempt.as_millis() as u64;
        self.max_attempts = max_attempts;
        self
    }

    /// Send `msg_type`/`payload` to the driver zone and wait for the
    /// matching response, retrying the send on a per-attempt timeout.
    /// Only one request may be in flight at a time on a given connection.
    pub fn call(&self, msg_type: MsgType, payload: IpcBuffer) -> io::Result<Reply> {
        let seq = self.conn.next_seq();
        let request = Message::new(
            msg_type,
            self.conn.local_zone(),
            self.conn.remote_zone(),
            seq,
            payload,
        );

        for attempt in 0..self.max_attempts {
            self.conn.send(&request, self.per_attempt_timeout_ms)?;

            let deadline_attempts_left = self.max_attempts - attempt;
            log::trace!(
                "correlator: seq {seq} attempt {attempt} ({deadline_attempts_left} remaining)"
            );

            match self.conn.recv(self.per_attempt_timeout_ms)? {
                Some(msg) if msg.header.seq_num == seq => return Self::into_reply(msg),
                Some(stale) => {
                    log::debug!(
                        "correlator: discarding reply for seq {} while awaiting {seq}",
                        stale.header.seq_num
                    );
                }
                None => continue,
            }
        }

        Err(io::Error::new(io::ErrorKind::TimedOut, "no matching response within retry budget"))
    }

    fn into_reply(msg: Message) -> io::Result<Reply> {
        match MsgType::from_u16(msg.header.msg_type) {
            Some(MsgType::ResponseOk) => {
                let body = msg.payload.data();
                let ok = ResponseOkHeader::decode(body)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed response"))?;
                let data = body[ResponseOkHeader::WIRE_SIZE..].to_vec();
                Ok(Reply { result: ok.result, data })
            }
            Some(MsgType::ResponseError) => {
                let err = ResponseError::decode(msg.payload.data())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed error response"))?;
                Err(translate_error(err.code))
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "expected a response message")),
        }
    }
}

/// Translate a wire error code into a local error, collapsing
/// `PERMISSION_DENIED` into `INVALID_HANDLE` so callers on the user side
/// never learn whether a handle exists under another zone's ownership.
fn translate_error(code: IdmErrorCode) -> io::Error {
    let collapsed = match code {
        IdmErrorCode::PermissionDenied => IdmErrorCode::InvalidHandle,
        other => other,
    };
    crate::transport::error_to_io(collapsed)
}
