// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wire format for inter-zone GPU messages: fixed 32-byte header plus an
// inline trailing payload, little-endian on the wire regardless of host
// endianness. Ported from the idm-protocol reference header.

use std::io;

use crate::buffer::IpcBuffer;

pub const IDM_MAGIC: u32 = 0x49444D00;
pub const IDM_VERSION: u16 = (1 << 8) | 0;

/// Largest payload a single message may carry, independent of any ring
/// slot's physical capacity (see [`crate::ring::SLOT_CAPACITY`]).
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

pub const HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    Alloc = 0x01,
    Free = 0x02,
    CopyH2D = 0x10,
    CopyD2H = 0x11,
    CopyD2D = 0x12,
    Memset = 0x13,
    LaunchKernel = 0x20,
    Sync = 0x21,
    GetInfo = 0x30,
    GetProps = 0x31,
    ResponseOk = 0xF0,
    ResponseError = 0xF1,
}

impl MsgType {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0x01 => MsgType::Alloc,
            0x02 => MsgType::Free,
            0x10 => MsgType::CopyH2D,
            0x11 => MsgType::CopyD2H,
            0x12 => MsgType::CopyD2D,
            0x13 => MsgType::Memset,
            0x20 => MsgType::LaunchKernel,
            0x21 => MsgType::Sync,
            0x30 => MsgType::GetInfo,
            0x31 => MsgType::GetProps,
            0xF0 => MsgType::ResponseOk,
            0xF1 => MsgType::ResponseError,
            _ => return None,
        })
    }

    pub fn is_response(self) -> bool {
        matches!(self, MsgType::ResponseOk | MsgType::ResponseError)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IdmErrorCode {
    None = 0,
    InvalidMessage = 1,
    InvalidHandle = 2,
    PermissionDenied = 3,
    OutOfMemory = 4,
    InvalidSize = 5,
    Timeout = 6,
    ConnectionLost = 7,
    DriverError = 8,
    Unknown = 99,
}

impl IdmErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => IdmErrorCode::None,
            1 => IdmErrorCode::InvalidMessage,
            2 => IdmErrorCode::InvalidHandle,
            3 => IdmErrorCode::PermissionDenied,
            4 => IdmErrorCode::OutOfMemory,
            5 => IdmErrorCode::InvalidSize,
            6 => IdmErrorCode::Timeout,
            7 => IdmErrorCode::ConnectionLost,
            8 => IdmErrorCode::DriverError,
            _ => IdmErrorCode::Unknown,
        }
    }
}

/// Fixed 32-byte message header, wire-identical across host architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u16,
    pub msg_type: u16,
    pub src_zone: u32,
    pub dst_zone: u32,
    pub seq_num: u64,
    pub payload_len: u32,
    pub reserved: u32,
}

impl Header {
    pub fn new(msg_type: MsgType, src_zone: u32, dst_zone: u32, seq_num: u64, payload_len: u32) -> Self {
        Self {
            magic: IDM_MAGIC,
            version: IDM_VERSION,
            msg_type: msg_type as u16,
            src_zone,
            dst_zone,
            seq_num,
            payload_len,
            reserved: 0,
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= HEADER_SIZE);
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.msg_type.to_le_bytes());
        out[8..12].copy_from_slice(&self.src_zone.to_le_bytes());
        out[12..16].copy_from_slice(&self.dst_zone.to_le_bytes());
        out[16..24].copy_from_slice(&self.seq_num.to_le_bytes());
        out[24..28].copy_from_slice(&self.payload_len.to_le_bytes());
        out[28..32].copy_from_slice(&self.reserved.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short header"));
        }
        let u32_at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
        let u16_at = |o: usize| u16::from_le_bytes(buf[o..o + 2].try_into().unwrap());
        let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap());
        Ok(Self {
            magic: u32_at(0),
            version: u16_at(4),
            msg_type: u16_at(6),
            src_zone: u32_at(8),
            dst_zone: u32_at(12),
            seq_num: u64_at(16),
            payload_len: u32_at(24),
            reserved: u32_at(28),
        })
    }

    /// Structural validity: magic, version, message type, and declared
    /// payload length must all be sane before anything downstream trusts them.
    pub fn validate(&self) -> Result<MsgType, IdmErrorCode> {
        if self.magic != IDM_MAGIC {
            return Err(IdmErrorCode::InvalidMessage);
        }
        if self.version != IDM_VERSION {
            return Err(IdmErrorCode::InvalidMessage);
        }
        if self.payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(IdmErrorCode::InvalidSize);
        }
        MsgType::from_u16(self.msg_type).ok_or(IdmErrorCode::InvalidMessage)
    }
}

/// A decoded message: header plus its trailing payload bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: IpcBuffer,
}

impl Message {
    pub fn new(msg_type: MsgType, src_zone: u32, dst_zone: u32, seq_num: u64, payload: IpcBuffer) -> Self {
        let header = Header::new(msg_type, src_zone, dst_zone, seq_num, payload.len() as u32);
        Self { header, payload }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode header + payload into `out`. `out` must be at least `encoded_len()` bytes.
    pub fn encode(&self, out: &mut [u8]) {
        self.header.encode(&mut out[..HEADER_SIZE]);
        let end = HEADER_SIZE + self.payload.len();
        out[HEADER_SIZE..end].copy_from_slice(self.payload.data());
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let header = Header::decode(buf)?;
        let plen = header.payload_len as usize;
        let end = HEADER_SIZE
            .checked_add(plen)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "payload_len overflow"))?;
        if buf.len() < end {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short payload"));
        }
        Ok(Self {
            header,
            payload: IpcBuffer::from_slice(&buf[HEADER_SIZE..end]),
        })
    }
}

// ---------------------------------------------------------------------------
// Fixed-size request/response payload structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocReq {
    pub size: u64,
}

impl AllocReq {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        self.size.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_len(buf, Self::WIRE_SIZE)?;
        Ok(Self { size: u64::from_le_bytes(buf[0..8].try_into().unwrap()) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeReq {
    pub handle: u64,
}

impl FreeReq {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        self.handle.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_len(buf, Self::WIRE_SIZE)?;
        Ok(Self { handle: u64::from_le_bytes(buf[0..8].try_into().unwrap()) })
    }
}

/// COPY_H2D: header fields followed by `len` bytes of payload data inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyH2dHeader {
    pub dst_handle: u64,
    pub dst_offset: u64,
    pub len: u64,
}

impl CopyH2dHeader {
    pub const WIRE_SIZE: usize = 24;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..8].copy_from_slice(&self.dst_handle.to_le_bytes());
        out[8..16].copy_from_slice(&self.dst_offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_min_len(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            dst_handle: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            dst_offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            len: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyD2hReq {
    pub src_handle: u64,
    pub src_offset: u64,
    pub len: u64,
}

impl CopyD2hReq {
    pub const WIRE_SIZE: usize = 24;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..8].copy_from_slice(&self.src_handle.to_le_bytes());
        out[8..16].copy_from_slice(&self.src_offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_len(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            src_handle: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            src_offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            len: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyD2dReq {
    pub dst_handle: u64,
    pub dst_offset: u64,
    pub src_handle: u64,
    pub src_offset: u64,
    pub len: u64,
}

impl CopyD2dReq {
    pub const WIRE_SIZE: usize = 40;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..8].copy_from_slice(&self.dst_handle.to_le_bytes());
        out[8..16].copy_from_slice(&self.dst_offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.src_handle.to_le_bytes());
        out[24..32].copy_from_slice(&self.src_offset.to_le_bytes());
        out[32..40].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_len(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            dst_handle: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            dst_offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            src_handle: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            src_offset: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            len: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemsetReq {
    pub handle: u64,
    pub offset: u64,
    pub len: u64,
    pub value: u8,
}

impl MemsetReq {
    pub const WIRE_SIZE: usize = 32;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..8].copy_from_slice(&self.handle.to_le_bytes());
        out[8..16].copy_from_slice(&self.offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.len.to_le_bytes());
        out[24] = self.value;
        out
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_len(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            handle: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            len: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            value: buf[24],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReq {
    pub handle: u64,
}

impl SyncReq {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        self.handle.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_len(buf, Self::WIRE_SIZE)?;
        Ok(Self { handle: u64::from_le_bytes(buf[0..8].try_into().unwrap()) })
    }
}

/// GET_INFO / GET_PROPS share a request shape: a small query code selecting
/// what the driver should report back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetInfoReq {
    pub query: u32,
}

impl GetInfoReq {
    pub const WIRE_SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        self.query.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_len(buf, Self::WIRE_SIZE)?;
        Ok(Self { query: u32::from_le_bytes(buf[0..4].try_into().unwrap()) })
    }
}

/// RESPONSE_OK carries a result code plus any trailing data (e.g. a new
/// handle for ALLOC, or copied bytes for COPY_D2H / GET_INFO / GET_PROPS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseOkHeader {
    pub result: u64,
}

impl ResponseOkHeader {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        self.result.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_min_len(buf, Self::WIRE_SIZE)?;
        Ok(Self { result: u64::from_le_bytes(buf[0..8].try_into().unwrap()) })
    }
}

/// RESPONSE_ERROR: the failed request's sequence number, the wire error
/// code, a driver-specific sub-code, and a NUL-truncated diagnostic string.
#[derive(Debug, Clone, Copy)]
pub struct ResponseError {
    pub request_seq: u64,
    pub code: IdmErrorCode,
    pub backend_error_code: u32,
    pub error_msg: [u8; Self::ERROR_MSG_LEN],
}

impl PartialEq for ResponseError {
    fn eq(&self, other: &Self) -> bool {
        self.request_seq == other.request_seq
            && self.code == other.code
            && self.backend_error_code == other.backend_error_code
            && self.error_msg[..] == other.error_msg[..]
    }
}
impl Eq for ResponseError {}

impl ResponseError {
    pub const ERROR_MSG_LEN: usize = 256;
    pub const WIRE_SIZE: usize = 8 + 4 + 4 + Self::ERROR_MSG_LEN;

    /// Build a response, truncating `msg` to fit the fixed, NUL-padded
    /// `error_msg` field.
    pub fn new(request_seq: u64, code: IdmErrorCode, backend_error_code: u32, msg: &str) -> Self {
        let mut error_msg = [0u8; Self::ERROR_MSG_LEN];
        let bytes = msg.as_bytes();
        let n = bytes.len().min(Self::ERROR_MSG_LEN - 1);
        error_msg[..n].copy_from_slice(&bytes[..n]);
        Self { request_seq, code, backend_error_code, error_msg }
    }

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..8].copy_from_slice(&self.request_seq.to_le_bytes());
        out[8..12].copy_from_slice(&(self.code as u32).to_le_bytes());
        out[12..16].copy_from_slice(&self.backend_error_code.to_le_bytes());
        out[16..16 + Self::ERROR_MSG_LEN].copy_from_slice(&self.error_msg);
        out
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        expect_len(buf, Self::WIRE_SIZE)?;
        let mut error_msg = [0u8; Self::ERROR_MSG_LEN];
        error_msg.copy_from_slice(&buf[16..16 + Self::ERROR_MSG_LEN]);
        Ok(Self {
            request_seq: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            code: IdmErrorCode::from_u32(u32::from_le_bytes(buf[8..12].try_into().unwrap())),
            backend_error_code: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            error_msg,
        })
    }
}

fn expect_len(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() != want {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected {want} bytes, got {}", buf.len()),
        ));
    }
    Ok(())
}

fn expect_min_len(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected at least {want} bytes, got {}", buf.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = Header::new(MsgType::CopyH2D, 2, 1, 42, 128);
        let mut buf = [0u8; HEADER_SIZE];
        h.encode(&mut buf);
        let back = Header::decode(&buf).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut h = Header::new(MsgType::Sync, 2, 1, 1, 0);
        h.magic = 0xdeadbeef;
        assert_eq!(h.validate(), Err(IdmErrorCode::InvalidMessage));
    }

    #[test]
    fn header_rejects_bad_version() {
        let mut h = Header::new(MsgType::Sync, 2, 1, 1, 0);
        h.version = 0xffff;
        assert_eq!(h.validate(), Err(IdmErrorCode::InvalidMessage));
    }

    #[test]
    fn header_rejects_oversized_payload() {
        let mut h = Header::new(MsgType::CopyH2D, 2, 1, 1, 0);
        h.payload_len = (MAX_PAYLOAD_SIZE + 1) as u32;
        assert_eq!(h.validate(), Err(IdmErrorCode::InvalidSize));
    }

    #[test]
    fn message_roundtrip_with_payload() {
        let payload = IpcBuffer::from_slice(b"hello gpu");
        let msg = Message::new(MsgType::CopyH2D, 2, 1, 7, payload.clone());
        let mut buf = vec![0u8; msg.encoded_len()];
        msg.encode(&mut buf);
        let back = Message::decode(&buf).unwrap();
        assert_eq!(back.header.seq_num, 7);
        assert_eq!(back.payload.data(), payload.data());
    }

    #[test]
    fn alloc_req_roundtrip() {
        let req = AllocReq { size: 4096 };
        let back = AllocReq::decode(&req.encode()).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn copy_d2d_req_roundtrip() {
        let req = CopyD2dReq { dst_handle: 9, dst_offset: 16, src_handle: 3, src_offset: 0, len: 256 };
        let back = CopyD2dReq::decode(&req.encode()).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn response_error_roundtrip() {
        let resp = ResponseError::new(42, IdmErrorCode::InvalidHandle, 7, "handle not found");
        let back = ResponseError::decode(&resp.encode()).unwrap();
        assert_eq!(resp, back);
    }

    #[test]
    fn response_error_truncates_long_message() {
        let long = "x".repeat(500);
        let resp = ResponseError::new(1, IdmErrorCode::DriverError, 0, &long);
        assert_eq!(resp.error_msg.len(), ResponseError::ERROR_MSG_LEN);
        assert_eq!(resp.error_msg[ResponseError::ERROR_MSG_LEN - 1], 0, "truncated message stays NUL-terminated");
    }
}
