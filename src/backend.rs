// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Abstraction over the backing driver the dispatcher talks to. The real
// deployment plugs in a CUDA-style driver; `StubBackend` here is a
// host-memory-backed implementation used by tests and demo binaries.

use crate::wire::IdmErrorCode;

/// Operations a GPU driver backend must provide for the dispatcher to
/// drive it. Mirrors the operations gpu-proxy's handlers.c performs
/// directly against the CUDA driver API.
pub trait Backend: Send + Sync {
    /// Allocate `size` bytes, returning a backend-native pointer/cookie.
    fn alloc(&self, size: u64) -> Result<u64, IdmErrorCode>;

    /// Free a previously allocated native pointer.
    fn free(&self, native_ptr: u64) -> Result<(), IdmErrorCode>;

    /// Copy `data` into the allocation at `native_ptr + offset`.
    fn copy_h2d(&self, native_ptr: u64, offset: u64, data: &[u8]) -> Result<(), IdmErrorCode>;

    /// Copy `len` bytes out of the allocation at `native_ptr + offset`.
    fn copy_d2h(&self, native_ptr: u64, offset: u64, len: u64) -> Result<Vec<u8>, IdmErrorCode>;

    /// Copy between two allocations, which may or may not be the same one.
    fn copy_d2d(
        &self,
        dst_ptr: u64,
        dst_offset: u64,
        src_ptr: u64,
        src_offset: u64,
        len: u64,
    ) -> Result<(), IdmErrorCode>;

    /// Fill `len` bytes starting at `offset` with `value`.
    fn memset(&self, native_ptr: u64, offset: u64, len: u64, value: u8) -> Result<(), IdmErrorCode>;

    /// Block until all outstanding work against this allocation completes.
    fn synchronize(&self, native_ptr: u64) -> Result<(), IdmErrorCode>;

    /// Answer a GET_INFO query, returning opaque response bytes.
    fn get_info(&self, query: u32) -> Result<Vec<u8>, IdmErrorCode>;

    /// Answer a GET_PROPS query, returning opaque response bytes.
    fn get_props(&self, query: u32) -> Result<Vec<u8>, IdmErrorCode>;
}

/// A `Backend` implementation over plain host memory, for tests and the
/// demo binaries. No real device is involved.
pub struct StubBackend {
    allocations: std::sync::Mutex<std::collections::HashMap<u64, Vec<u8>>>,
    next_ptr: std::sync::atomic::AtomicU64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            allocations: std::sync::Mutex::new(std::collections::HashMap::new()),
            next_ptr: std::sync::atomic::AtomicU64::new(0x1000),
        }
    }

    fn bounds_check(buf: &[u8], offset: u64, len: u64) -> Result<(usize, usize), IdmErrorCode> {
        let offset = offset as usize;
        let len = len as usize;
        let end = offset.checked_add(len).ok_or(IdmErrorCode::InvalidSize)?;
        if end > buf.len() {
            return Err(IdmErrorCode::InvalidSize);
        }
        Ok((offset, end))
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for StubBackend {
    fn alloc(&self, size: u64) -> Result<u64, IdmErrorCode> {
        if size == 0 {
            return Err(IdmErrorCode::InvalidSize);
        }
        let ptr = self.next_ptr.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut allocations = self.allocations.lock().unwrap();
        allocations.insert(ptr, vec![0u8; size as usize]);
        Ok(ptr)
    }

    fn free(&self, native_ptr: u64) -> Result<(), IdmErrorCode> {
        let mut allocations = self.allocations.lock().unwrap();
        allocations.remove(&native_ptr).map(|_| ()).ok_or(IdmErrorCode::InvalidHandle)
    }

    fn copy_h2d(&self, native_ptr: u64, offset: u64, data: &[u8]) -> Result<(), IdmErrorCode> {
        let mut allocations = self.allocations.lock().unwrap();
        let buf = allocations.get_mut(&native_ptr).ok_or(IdmErrorCode::InvalidHandle)?;
        let (start, end) = Self::bounds_check(buf, offset, data.len() as u64)?;
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn copy_d2h(&self, native_ptr: u64, offset: u64, len: u64) -> Result<Vec<u8>, IdmErrorCode> {
        let allocations = self.allocations.lock().unwrap();
        let buf = allocations.get(&native_ptr).ok_or(IdmErrorCode::InvalidHandle)?;
        let (start, end) = Self::bounds_check(buf, offset, len)?;
        Ok(buf[start..end].to_vec())
    }

    fn copy_d2d(
        &self,
        dst_ptr: u64,
        dst_offset: u64,
        src_ptr: u64,
        src_offset: u64,
        len: u64,
    ) -> Result<(), IdmErrorCode> {
        let mut allocations = self.allocations.lock().unwrap();
        let data = {
            let src = allocations.get(&src_ptr).ok_or(IdmErrorCode::InvalidHandle)?;
            let (start, end) = Self::bounds_check(src, src_offset, len)?;
            src[start..end].to_vec()
        };
        let dst = allocations.get_mut(&dst_ptr).ok_or(IdmErrorCode::InvalidHandle)?;
        let (start, end) = Self::bounds_check(dst, dst_offset, len)?;
        dst[start..end].copy_from_slice(&data);
        Ok(())
    }

    fn memset(&self, native_ptr: u64, offset: u64, len: u64, value: u8) -> Result<(), IdmErrorCode> {
        let mut allocations = self.allocations.lock().unwrap();
        let buf = allocations.get_mut(&native_ptr).ok_or(IdmErrorCode::InvalidHandle)?;
        let (start, end) = Self::bounds_check(buf, offset, len)?;
        buf[start..end].fill(value);
        Ok(())
    }

    fn synchronize(&self, native_ptr: u64) -> Result<(), IdmErrorCode> {
        let allocations = self.allocations.lock().unwrap();
        if allocations.contains_key(&native_ptr) {
            Ok(())
        } else {
            Err(IdmErrorCode::InvalidHandle)
        }
    }

    fn get_info(&self, query: u32) -> Result<Vec<u8>, IdmErrorCode> {
        match query {
            // Device count.
            0 => Ok(1u32.to_le_bytes().to_vec()),
            _ => Err(IdmErrorCode::InvalidMessage),
        }
    }

    fn get_props(&self, query: u32) -> Result<Vec<u8>, IdmErrorCode> {
        match query {
            // Total device memory, in bytes (stub value).
            0 => Ok((8u64 * 1024 * 1024 * 1024).to_le_bytes().to_vec()),
            _ => Err(IdmErrorCode::InvalidMessage),
        }
    }
}
