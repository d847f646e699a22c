// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-wide table mapping opaque handles to backend allocations, with
// per-zone ownership enforcement. Ported from gpu-proxy's handle_table.c,
// but the C original's "not found" vs "wrong owner" distinction, which
// it already collapsed to a single NULL return for the caller while
// logging the mismatch to stderr, is made an explicit, tested invariant
// here: both cases resolve to the same `IdmErrorCode::InvalidHandle` on
// the wire, with the distinction kept only in the `log` diagnostics.

use std::collections::HashMap;
use std::sync::Mutex;

/// One live allocation tracked by the handle table.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub owner_zone: u32,
    pub native_ptr: u64,
    pub size: u64,
}

struct Inner {
    entries: HashMap<u64, Entry>,
    next_handle: u64,
    live_bytes: u64,
}

/// Process-wide handle table. Handles are monotonically increasing and
/// never recycled, so a stale handle from a freed allocation can never
/// alias a later one.
pub struct HandleTable {
    inner: Mutex<Inner>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), next_handle: 1, live_bytes: 0 }),
        }
    }

    /// Insert a new entry, returning its freshly minted handle. A null
    /// `native_ptr` never gets a handle minted for it; the caller gets 0
    /// back, the same value used for an allocation failure.
    pub fn insert(&self, owner_zone: u32, native_ptr: u64, size: u64) -> u64 {
        if native_ptr == 0 {
            return 0;
        }
        let mut inner = self.inner.lock().unwrap();
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.entries.insert(handle, Entry { owner_zone, native_ptr, size });
        inner.live_bytes += size;
        handle
    }

    /// Look up a handle, verifying it is owned by `zone`. A handle that
    /// exists but belongs to a different zone is logged as a security
    /// event and reported to the caller exactly as if it did not exist.
    pub fn lookup(&self, handle: u64, zone: u32) -> Option<Entry> {
        let inner = self.inner.lock().unwrap();
        match inner.entries.get(&handle) {
            None => {
                log::debug!("handle {handle} not found (requested by zone {zone})");
                None
            }
            Some(entry) if entry.owner_zone != zone => {
                log::warn!(
                    "zone {zone} attempted to access handle {handle} owned by zone {}",
                    entry.owner_zone
                );
                None
            }
            Some(entry) => Some(*entry),
        }
    }

    /// Remove a handle, verifying ownership first. Returns the removed
    /// entry on success. Same not-found/wrong-owner collapsing as [`lookup`].
    ///
    /// [`lookup`]: HandleTable::lookup
    pub fn remove(&self, handle: u64, zone: u32) -> Option<Entry> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(&handle) {
            None => {
                log::debug!("remove: handle {handle} not found (requested by zone {zone})");
                None
            }
            Some(entry) if entry.owner_zone != zone => {
                log::warn!(
                    "zone {zone} attempted to free handle {handle} owned by zone {}",
                    entry.owner_zone
                );
                None
            }
            Some(_) => {
                let entry = inner.entries.remove(&handle).unwrap();
                inner.live_bytes -= entry.size;
                Some(entry)
            }
        }
    }

    /// Number of live entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(live_count, live_bytes)` across every owner zone, for diagnostics
    /// and capacity reporting.
    pub fn stats(&self) -> (usize, u64) {
        let inner = self.inner.lock().unwrap();
        (inner.entries.len(), inner.live_bytes)
    }

    /// Drop every entry without touching the backend. Unlike [`drain_zone`],
    /// this discards the removed entries: it is for resetting the table
    /// itself, not for releasing backing allocations, which is the caller's
    /// responsibility when it has the entries in hand.
    ///
    /// [`drain_zone`]: HandleTable::drain_zone
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.live_bytes = 0;
    }

    /// Remove every entry owned by `zone`, e.g. when a zone disconnects.
    /// Returns the removed entries so the caller can free their backing
    /// storage.
    pub fn drain_zone(&self, zone: u32) -> Vec<(u64, Entry)> {
        let mut inner = self.inner.lock().unwrap();
        let to_remove: Vec<u64> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.owner_zone == zone)
            .map(|(h, _)| *h)
            .collect();
        to_remove
            .into_iter()
            .map(|h| {
                let entry = inner.entries.remove(&h).unwrap();
                inner.live_bytes -= entry.size;
                (h, entry)
            })
            .collect()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
