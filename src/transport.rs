// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Owned connection between two zones: a pair of rings (one per direction)
// plus wake semaphores, in the manner of the idm-protocol reference
// transport's idm_init/idm_send/idm_recv/idm_cleanup, but surfaced as an
// explicit, owned value instead of a process-wide global.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::ring::Ring;
use crate::semaphore::IpcSemaphore;
use crate::wire::{Header, IdmErrorCode, Message, MsgType};

/// A zone-keyed shared resource is named after the *receiving* zone: the
/// sender's outbound ring is the receiver's inbound ring for that name.
fn ring_name(zone_id: u32) -> String {
    format!("idm_ring_{zone_id}")
}

fn sem_name(zone_id: u32) -> String {
    format!("idm_sem_{zone_id}")
}

/// An established (or establishing) connection between `local_zone` and
/// `remote_zone`. Each side owns one `Connection`: its outbound ring is
/// named after the peer, its inbound ring is named after itself.
pub struct Connection {
    local_zone: u32,
    remote_zone: u32,
    tx_ring: Ring,
    rx_ring: Ring,
    tx_wake: IpcSemaphore,
    rx_wake: IpcSemaphore,
    next_seq: AtomicU64,
}

impl Connection {
    /// Establish (creating shared resources as needed) a connection between
    /// `local_zone` and `remote_zone`. Both sides call this with their own
    /// `local_zone`/`remote_zone` pair; the zone-keyed naming convention
    /// makes the two calls rendezvous on the same shared memory and
    /// semaphores without either side needing to be "first".
    pub fn build(local_zone: u32, remote_zone: u32) -> io::Result<Self> {
        let tx_ring = Ring::open_or_create(&ring_name(remote_zone))?;
        let rx_ring = Ring::open_or_create(&ring_name(local_zone))?;
        let tx_wake = IpcSemaphore::open(&sem_name(remote_zone), 0)?;
        let rx_wake = IpcSemaphore::open(&sem_name(local_zone), 0)?;

        Ok(Self {
            local_zone,
            remote_zone,
            tx_ring,
            rx_ring,
            tx_wake,
            rx_wake,
            next_seq: AtomicU64::new(1),
        })
    }

    pub fn local_zone(&self) -> u32 {
        self.local_zone
    }

    pub fn remote_zone(&self) -> u32 {
        self.remote_zone
    }

    /// Allocate the next outbound sequence number for this connection.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Build and send a message, publishing it to the outbound ring and
    /// signalling the peer's wake semaphore. Blocks briefly (spin + yield)
    /// if the ring is momentarily full, bounded by `timeout_ms`. Rejects a
    /// structurally invalid header (bad magic/version/payload length)
    /// before it is ever enqueued.
    pub fn send(&self, msg: &Message, timeout_ms: u64) -> io::Result<()> {
        if let Err(code) = msg.header.validate() {
            return Err(error_to_io(code));
        }

        let mut buf = vec![0u8; msg.encoded_len()];
        msg.encode(&mut buf);

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.tx_ring.try_send(&buf)? {
                self.tx_wake.post(1)?;
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "peer ring is full"));
            }
            std::thread::yield_now();
        }
    }

    /// Receive the next message, waiting up to `timeout_ms` milliseconds.
    /// Returns `Ok(None)` on timeout with nothing pending. A message whose
    /// header fails validation (bad magic/version/payload length) is
    /// dropped silently: it never surfaces to the caller, and the wait for
    /// a real message continues until `timeout_ms` elapses.
    pub fn recv(&self, timeout_ms: u64) -> io::Result<Option<Message>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            if let Some(raw) = self.rx_ring.try_recv()? {
                let msg = Message::decode(&raw)?;
                if let Err(code) = msg.header.validate() {
                    log::warn!(
                        "dropping message from zone {} with invalid header: {code:?}",
                        msg.header.src_zone
                    );
                    continue;
                }
                return Ok(Some(msg));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.rx_wake.wait(Some(remaining.as_millis().min(u64::MAX as u128) as u64))?;
        }
    }

    /// Build a well-formed request header addressed to the peer.
    pub fn make_header(&self, msg_type: MsgType, payload_len: u32) -> Header {
        Header::new(msg_type, self.local_zone, self.remote_zone, self.next_seq(), payload_len)
    }

    /// Release shared resources this side owns. The peer may still be
    /// attached; shared memory and semaphores are reference-counted and
    /// only actually removed once the last handle drops.
    pub fn close(self) {
        drop(self);
    }
}

/// Translates a wire-level error code into the local `io::Error` domain
/// used at API boundaries that don't themselves speak the wire protocol.
pub fn error_to_io(code: IdmErrorCode) -> io::Error {
    let kind = match code {
        IdmErrorCode::None => io::ErrorKind::Other,
        IdmErrorCode::InvalidMessage => io::ErrorKind::InvalidData,
        IdmErrorCode::InvalidHandle => io::ErrorKind::NotFound,
        IdmErrorCode::PermissionDenied => io::ErrorKind::PermissionDenied,
        IdmErrorCode::OutOfMemory => io::ErrorKind::OutOfMemory,
        IdmErrorCode::InvalidSize => io::ErrorKind::InvalidInput,
        IdmErrorCode::Timeout => io::ErrorKind::TimedOut,
        IdmErrorCode::ConnectionLost => io::ErrorKind::ConnectionAborted,
        IdmErrorCode::DriverError | IdmErrorCode::Unknown => io::ErrorKind::Other,
    };
    io::Error::new(kind, format!("{code:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::IpcBuffer;

    #[test]
    fn connection_rendezvous_and_roundtrip() {
        let driver = 101u32;
        let user = 102u32;
        Ring::clear_storage(&format!("idm_ring_{driver}"));
        Ring::clear_storage(&format!("idm_ring_{user}"));
        IpcSemaphore::clear_storage(&format!("idm_sem_{driver}"));
        IpcSemaphore::clear_storage(&format!("idm_sem_{user}"));

        let user_side = Connection::build(user, driver).unwrap();
        let driver_side = Connection::build(driver, user).unwrap();

        let payload = IpcBuffer::from_slice(b"ping");
        let msg = Message::new(MsgType::Sync, user, driver, user_side.next_seq(), payload);
        user_side.send(&msg, 1000).unwrap();

        let got = driver_side.recv(1000).unwrap().expect("message arrives");
        assert_eq!(got.header.msg_type, MsgType::Sync as u16);
        assert_eq!(got.payload.data(), b"ping");
    }

    #[test]
    fn recv_times_out_when_idle() {
        let driver = 201u32;
        let user = 202u32;
        Ring::clear_storage(&format!("idm_ring_{driver}"));
        Ring::clear_storage(&format!("idm_ring_{user}"));
        IpcSemaphore::clear_storage(&format!("idm_sem_{driver}"));
        IpcSemaphore::clear_storage(&format!("idm_sem_{user}"));

        let driver_side = Connection::build(driver, user).unwrap();
        let got = driver_side.recv(50).unwrap();
        assert!(got.is_none());
    }
}
