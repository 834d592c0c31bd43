//! End-to-end UMC scenarios driven purely through the public API: build a
//! controller, wire it to in-process NM/FM stand-ins, and push packets
//! through the full timing round trip.

mod common;

use hum::config::AddrRange;
use hum::mem_device::{SharedCpu, SharedMemDevice};
use hum::policy::PortSide;
use hum::port::{CpuSidePort, MemSidePort};
use hum::{Packet, RemapPolicy, UmcConfig, UmcController};

fn build(ratio: u32) -> (UmcController, SharedMemDevice, SharedMemDevice, SharedCpu) {
    common::init_logging();
    let block = UmcConfig::BLOCK_SIZE as u64;
    let near = AddrRange::new(0, block * 4);
    let far = AddrRange::new(0x10_0000, 0x10_0000 + block * 4 * ratio as u64);
    let config = UmcConfig::new(near, far, 1).unwrap();

    let fm = SharedMemDevice::new(far.start, (block * 4 * ratio as u64) as usize);
    let nm = SharedMemDevice::new(near.start, (block * 4) as usize);
    let cpu = SharedCpu::new();

    let fm_port = MemSidePort::new(0, Box::new(fm.clone()));
    let nm_port = MemSidePort::new(1, Box::new(nm.clone()));
    let cpu_port = CpuSidePort::new(0, Box::new(cpu.clone()));
    (UmcController::new(config, vec![cpu_port], fm_port, nm_port), fm, nm, cpu)
}

/// UMC-A: a cold FM read below the migration threshold takes F2 -
/// forwarded straight to FM, counter bumped, no remap yet.
#[test]
fn umc_a_cold_fm_read_forwards_to_fm() {
    let (mut ctrl, fm, _nm, cpu) = build(4);
    let addr = 0x10_0000 + UmcConfig::BLOCK_SIZE as u64 * 5; // index 1, curpos 2
    fm.seed(addr, b"hello-fm");

    ctrl.handle_request(Packet::read(addr, 8, 1), PortSide::Cpu(0)).unwrap();
    let resp = fm.pop_response().expect("forwarded to FM");
    assert_eq!(resp.addr, addr);
    ctrl.handle_response(resp).unwrap();

    let delivered = cpu.pop_response().expect("CPU got a response");
    assert_eq!(delivered.payload, b"hello-fm");
    assert_eq!(ctrl.entry(1).counter(2), 1);
    assert_eq!(ctrl.entry(1).hotpos(), 0);
}

/// UMC-B: the same FM position accessed past the migration threshold
/// migrates into its NM frame, then the very next access to it takes F1.
#[test]
fn umc_b_migration_then_f1_hit_round_trips_through_nm() {
    let (mut ctrl, fm, nm, cpu) = build(4);
    let addr = 0x10_0000 + UmcConfig::BLOCK_SIZE as u64 * 5; // index 1, curpos 2
    fm.seed(addr, b"payload!");

    for i in 0..7u64 {
        ctrl.handle_request(Packet::read(addr, 8, i), PortSide::Cpu(0)).unwrap();
        let resp = fm.pop_response().expect("still forwarded to FM");
        ctrl.handle_response(resp).unwrap();
        let _ = cpu.pop_response();
    }
    assert_eq!(ctrl.entry(1).hotpos(), 2);
    assert_eq!(ctrl.stats().migrations, 1);

    ctrl.handle_request(Packet::read(addr, 8, 100), PortSide::Cpu(0)).unwrap();
    let resp = nm.pop_response().expect("F1 hit forwards to NM");
    ctrl.handle_response(resp).unwrap();
    let delivered = cpu.pop_response().expect("CPU got a response");
    assert_eq!(delivered.payload, b"payload!");
}

/// Back-to-back requests on a single CPU port: the second must be
/// refused with a retry marker while the first is still outstanding.
#[test]
fn single_outstanding_request_forces_retry() {
    let (mut ctrl, _fm, _nm, _cpu) = build(4);
    let addr = 0x10_0000 + UmcConfig::BLOCK_SIZE as u64 * 5;
    ctrl.handle_request(Packet::read(addr, 8, 1), PortSide::Cpu(0)).unwrap();
    let err = ctrl.handle_request(Packet::read(addr, 8, 2), PortSide::Cpu(0)).unwrap_err();
    assert_eq!(err, hum::HumError::PortBlocked);
}
