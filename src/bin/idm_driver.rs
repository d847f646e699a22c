// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Driver-zone dispatcher daemon. Port of gpu-proxy/main.c's run_server(),
// with the CUDA driver replaced by a host-memory-backed stub backend.

use std::sync::Arc;

use idm_transport::backend::StubBackend;
use idm_transport::dispatcher::Dispatcher;
use idm_transport::handle_table::HandleTable;
use idm_transport::transport::Connection;

/// By convention the driver zone is assigned id 1 and the user zone id 2.
const DRIVER_ZONE_ID: u32 = 1;
const USER_ZONE_ID: u32 = 2;

fn parse_args() -> (u32, u32, u64) {
    let mut args = std::env::args().skip(1);
    let local = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DRIVER_ZONE_ID);
    let remote = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(USER_ZONE_ID);
    let recv_timeout_ms = args.next().and_then(|s| s.parse().ok()).unwrap_or(1000);
    (local, remote, recv_timeout_ms)
}

#[cfg(unix)]
fn install_signal_handlers(stop: Arc<std::sync::atomic::AtomicBool>) {
    use std::sync::atomic::Ordering;

    static STOP: std::sync::OnceLock<Arc<std::sync::atomic::AtomicBool>> = std::sync::OnceLock::new();
    let _ = STOP.set(stop);

    extern "C" fn handler(_sig: libc::c_int) {
        if let Some(flag) = STOP.get() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers(_stop: Arc<std::sync::atomic::AtomicBool>) {}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let (local_zone, remote_zone, recv_timeout_ms) = parse_args();
    log::info!("driver zone {local_zone}, user zone {remote_zone}");

    let conn = Connection::build(local_zone, remote_zone)?;
    let backend = Arc::new(StubBackend::new());
    let handles = Arc::new(HandleTable::new());
    let mut dispatcher = Dispatcher::new(conn, backend, Arc::clone(&handles));

    install_signal_handlers(dispatcher.stop_flag());

    log::info!("ready to process requests");
    dispatcher.run(recv_timeout_ms)?;

    log::info!("shut down; {} handles still tracked (should be 0)", handles.len());
    Ok(())
}
