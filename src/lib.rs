// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inter-domain messaging transport: a lock-free-style SPSC ring buffer
// over shared memory with wake notifications, a typed GPU request/response
// protocol, and a driver-side dispatcher enforcing per-zone handle
// ownership.

pub mod shm_name;
mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod buffer;
pub use buffer::IpcBuffer;

mod spin_lock;
pub use spin_lock::SpinLock;

mod semaphore;
pub use semaphore::IpcSemaphore;

pub mod wire;
pub use wire::{Header, IdmErrorCode, Message, MsgType};

pub mod ring;
pub use ring::Ring;

pub mod transport;
pub use transport::Connection;

pub mod handle_table;
pub use handle_table::HandleTable;

pub mod backend;
pub use backend::{Backend, StubBackend};

pub mod dispatcher;
pub use dispatcher::{Dispatcher, DispatcherState};

pub mod correlator;
pub use correlator::{Correlator, Reply};
