// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// User-zone demo client: allocates device memory, copies data in, copies
// it back out, and frees it, driving the driver zone's dispatcher over
// the correlator.

use idm_transport::wire::{AllocReq, CopyD2hReq, CopyH2dHeader, FreeReq, MsgType, SyncReq};
use idm_transport::{Connection, Correlator, IpcBuffer};

const DRIVER_ZONE_ID: u32 = 1;
const USER_ZONE_ID: u32 = 2;

fn parse_args() -> (u32, u32) {
    let mut args = std::env::args().skip(1);
    let local = args.next().and_then(|s| s.parse().ok()).unwrap_or(USER_ZONE_ID);
    let remote = args.next().and_then(|s| s.parse().ok()).unwrap_or(DRIVER_ZONE_ID);
    (local, remote)
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let (local_zone, remote_zone) = parse_args();
    let conn = Connection::build(local_zone, remote_zone)?;
    let correlator = Correlator::new(&conn);

    let alloc_payload = IpcBuffer::from_vec(AllocReq { size: 64 }.encode().to_vec());
    let alloc_reply = correlator.call(MsgType::Alloc, alloc_payload)?;
    let handle = u64::from_le_bytes(alloc_reply.data[0..8].try_into().unwrap());
    log::info!("allocated handle {handle}");

    let mut h2d_body = CopyH2dHeader { dst_handle: handle, dst_offset: 0, len: 13 }.encode().to_vec();
    h2d_body.extend_from_slice(b"hello, zone 1");
    correlator.call(MsgType::CopyH2D, IpcBuffer::from_vec(h2d_body))?;
    log::info!("copied 13 bytes host-to-device");

    let d2h_payload = IpcBuffer::from_vec(CopyD2hReq { src_handle: handle, src_offset: 0, len: 13 }.encode().to_vec());
    let d2h_reply = correlator.call(MsgType::CopyD2H, d2h_payload)?;
    log::info!("read back: {:?}", String::from_utf8_lossy(&d2h_reply.data));

    let sync_payload = IpcBuffer::from_vec(SyncReq { handle }.encode().to_vec());
    correlator.call(MsgType::Sync, sync_payload)?;

    let free_payload = IpcBuffer::from_vec(FreeReq { handle }.encode().to_vec());
    correlator.call(MsgType::Free, free_payload)?;
    log::info!("freed handle {handle}");

    Ok(())
}
