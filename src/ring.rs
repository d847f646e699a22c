// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-producer/single-consumer ring buffer over shared memory, one
// direction of an inter-zone connection. Fixed-size slots holding one
// wire message each; producer/consumer indices published with
// acquire/release ordering, mirroring the barrier discipline of
// cpp-ipc's shm_ring but specialised to 32-bit indices and fixed
// 4096-byte page-aligned slots instead of a generic element type.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::shm::{ShmHandle, ShmOpenMode};
use crate::wire::HEADER_SIZE;

/// Number of slots in the ring. Must be a power of two.
pub const RING_SIZE: u32 = 32;

/// Size in bytes of a single ring slot.
pub const SLOT_SIZE: usize = 4096;

/// Largest wire message (header + payload) a single slot can hold.
/// This is the ring's own physical capacity and is independent of
/// `wire::MAX_PAYLOAD_SIZE`, which bounds message size generically.
pub const SLOT_CAPACITY: usize = SLOT_SIZE - HEADER_SIZE;

#[repr(C)]
struct RingHeader {
    producer: AtomicU32,
    consumer: AtomicU32,
    // Pad to a cache line so producer/consumer indices (each touched by a
    // different thread) don't share a line with slot data.
    _pad: [u8; 56],
}

const RING_HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();

fn region_size() -> usize {
    RING_HEADER_SIZE + (RING_SIZE as usize) * SLOT_SIZE
}

/// One direction of shared-memory message transport: a fixed ring of
/// `RING_SIZE` slots, each `SLOT_SIZE` bytes, with a single producer and
/// a single consumer.
pub struct Ring {
    shm: ShmHandle,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Create (or re-attach to) the named ring as its producer/owner side.
    /// Zero-initialises the header the first time the segment is created.
    pub fn open_or_create(name: &str) -> io::Result<Self> {
        let shm = ShmHandle::acquire(name, region_size(), ShmOpenMode::CreateOrOpen)?;
        let ring = Self { shm };
        if ring.shm.ref_count() == 1 {
            ring.header().producer.store(0, Ordering::Relaxed);
            ring.header().consumer.store(0, Ordering::Relaxed);
        }
        Ok(ring)
    }

    /// Attach to an already-created named ring (fails if it does not exist).
    pub fn open_existing(name: &str) -> io::Result<Self> {
        let shm = ShmHandle::acquire(name, region_size(), ShmOpenMode::Open)?;
        Ok(Self { shm })
    }

    fn header(&self) -> &RingHeader {
        unsafe { &*(self.shm.as_ptr() as *const RingHeader) }
    }

    fn slot_ptr(&self, idx: u32) -> *mut u8 {
        let slot = (idx & (RING_SIZE - 1)) as usize;
        unsafe { self.shm.as_mut_ptr().add(RING_HEADER_SIZE + slot * SLOT_SIZE) }
    }

    fn is_full(&self, producer: u32, consumer: u32) -> bool {
        producer.wrapping_sub(consumer) == RING_SIZE
    }

    fn is_empty(&self, producer: u32, consumer: u32) -> bool {
        producer == consumer
    }

    /// True if no other handle had attached before this one (i.e. we're
    /// responsible for zero-initialising the header).
    pub fn newly_created(&self) -> bool {
        self.shm.ref_count() == 1
    }

    /// Attempt to publish `bytes` into the next free slot. Returns
    /// `Ok(true)` on success, `Ok(false)` if the ring is currently full.
    /// `bytes` must not exceed [`SLOT_CAPACITY`].
    pub fn try_send(&self, bytes: &[u8]) -> io::Result<bool> {
        if bytes.len() > SLOT_CAPACITY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("message of {} bytes exceeds ring slot capacity {}", bytes.len(), SLOT_CAPACITY),
            ));
        }

        let header = self.header();
        let producer = header.producer.load(Ordering::Relaxed);
        let consumer = header.consumer.load(Ordering::Acquire);

        if self.is_full(producer, consumer) {
            return Ok(false);
        }

        let dst = self.slot_ptr(producer);
        unsafe {
            // Length prefix so the consumer knows how much of the slot is live.
            let len = bytes.len() as u32;
            std::ptr::copy_nonoverlapping(len.to_le_bytes().as_ptr(), dst, 4);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(4), bytes.len());
        }

        header.producer.store(producer.wrapping_add(1), Ordering::Release);
        Ok(true)
    }

    /// Attempt to take the oldest unread slot. Returns `Ok(None)` if the
    /// ring is currently empty.
    pub fn try_recv(&self) -> io::Result<Option<Vec<u8>>> {
        let header = self.header();
        let consumer = header.consumer.load(Ordering::Relaxed);
        let producer = header.producer.load(Ordering::Acquire);

        if self.is_empty(producer, consumer) {
            return Ok(None);
        }

        let src = self.slot_ptr(consumer);
        let len = unsafe {
            let mut len_buf = [0u8; 4];
            std::ptr::copy_nonoverlapping(src, len_buf.as_mut_ptr(), 4);
            u32::from_le_bytes(len_buf) as usize
        };
        if len > SLOT_CAPACITY {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt ring slot length"));
        }

        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(src.add(4), out.as_mut_ptr(), len);
        }

        header.consumer.store(consumer.wrapping_add(1), Ordering::Release);
        Ok(Some(out))
    }

    /// Number of unread slots currently occupied.
    pub fn len(&self) -> u32 {
        let header = self.header();
        let producer = header.producer.load(Ordering::Acquire);
        let consumer = header.consumer.load(Ordering::Acquire);
        producer.wrapping_sub(consumer)
    }

    pub fn is_ring_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ring_full(&self) -> bool {
        self.len() == RING_SIZE
    }

    /// Remove the backing shared memory segment.
    pub fn clear_storage(name: &str) {
        ShmHandle::clear_storage(name);
    }
}
