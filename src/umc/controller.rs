//! UMC policy engine: set-associative remap table with saturating hotness
//! counters.
//!
//! Grounded on `umcontroller.cc::handlePageRequest` (decision tables F1-F5c
//! for FM-side accesses, N1-N6 for NM-side accesses) and `handleRequest`'s
//! span-splitting wrapper. Port convention, preserved from the original
//! comment ("we assume port 1 connect to NM, port0 connects to FM"):
//! `mem_ports[0]` is FM, `mem_ports[1]` is NM.

use std::collections::VecDeque;

use log::{debug, error, trace};

use crate::config::{Location, UmcConfig};
use crate::error::{HumError, HumResult};
use crate::packet::{Cmd, Packet};
use crate::policy::{Accepted, PortSide, RemapPolicy};
use crate::port::{CpuSidePort, MemSidePort};
use crate::splitter::Splitter;
use crate::stats::Stats;

use super::entry::UmcEntry;

const FM: usize = 0;
const NM: usize = 1;

pub struct UmcController {
    config: UmcConfig,
    table: Vec<UmcEntry>,
    stats: Stats,
    cpu_ports: Vec<CpuSidePort>,
    mem_ports: [MemSidePort; 2],
    blocked: bool,
    waiting_cpu_port: Option<usize>,
    splitter: Splitter,
    pending_children: VecDeque<Packet>,
}

impl UmcController {
    pub fn new(config: UmcConfig, cpu_ports: Vec<CpuSidePort>, fm_port: MemSidePort, nm_port: MemSidePort) -> Self {
        let ratio = config.base.ratio();
        let frame_count = config.base.frame_count();
        let block_size = config.base.block_size;
        Self {
            config,
            table: (0..frame_count).map(|_| UmcEntry::new(ratio)).collect(),
            stats: Stats::default(),
            cpu_ports,
            mem_ports: [fm_port, nm_port],
            blocked: false,
            waiting_cpu_port: None,
            splitter: Splitter::new(block_size),
            pending_children: VecDeque::new(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn entry(&self, index: usize) -> &UmcEntry {
        &self.table[index]
    }

    fn functional_read(&mut self, side: usize, addr: u64) -> Vec<u8> {
        let pkt = Packet::read(addr, self.config.base.block_size, 0);
        let resp = self.mem_ports[side].functional(pkt);
        if side == FM {
            self.stats.record_fm_read();
        } else {
            self.stats.record_nm_read();
        }
        resp.payload
    }

    fn functional_write(&mut self, side: usize, addr: u64, payload: Vec<u8>) {
        let pkt = Packet::write(addr, payload, 0);
        self.mem_ports[side].functional(pkt);
        if side == FM {
            self.stats.record_fm_write();
        } else {
            self.stats.record_nm_write();
        }
    }

    fn block_addr(&self, addr: u64) -> u64 {
        let b = self.config.base.block_size as u64;
        addr - (addr % b)
    }

    /// Forward a rewritten timing packet downstream. A declined send is
    /// not this access's problem to report: `MemSidePort::send_packet`
    /// already retains the packet and resends it on `recv_req_retry`, so
    /// the request the caller is processing stays accepted (matching the
    /// original's `void sendPacket`, which never aborts `handleRequest`).
    fn forward(&mut self, side: usize, pkt: Packet) {
        if self.mem_ports[side].send_packet(pkt).is_err() {
            debug!(target: "hum::umc", "mem port {side} declined send, queued for retry");
        }
    }

    /// The decision trees of §4.1, operating on one block-aligned page
    /// packet. Issues functional swap traffic as needed, rewrites `pkt`'s
    /// address, and forwards it via the timing path to the resolved port.
    fn handle_page_request(&mut self, pkt: Packet) -> HumResult<()> {
        match self.config.base.classify(pkt.addr) {
            Some(Location::Fm) => self.handle_fm_side(pkt),
            Some(Location::Nm) => self.handle_nm_side(pkt),
            // Shouldn't happen: the splitter only ever hands back addresses
            // drawn from the original, already-classified packet.
            None => {
                error!(target: "hum::umc", "address {:#x} (size {}) falls outside both tiers", pkt.addr, pkt.size);
                Err(HumError::SpanTooLarge { addr: pkt.addr, size: pkt.size })
            }
        }
    }

    fn handle_fm_side(&mut self, mut pkt: Packet) -> HumResult<()> {
        let ratio = self.config.base.ratio();
        let (index, curpos) = self.config.base.fm_index_and_pos(pkt.addr);
        let offset = pkt.addr % self.config.base.block_size as u64;
        let nm_block_addr = self.config.base.nm_addr(index);
        let nm_addr = nm_block_addr + offset;
        let block_addr = self.block_addr(pkt.addr);

        let hotpos = self.table[index].hotpos();

        if curpos == hotpos {
            // F1
            pkt.addr = nm_addr;
            self.table[index].inc(curpos);
            self.forward(NM, pkt);
            return Ok(());
        }

        if hotpos == 0 {
            let c = self.table[index].inc(curpos);
            if c < UmcEntry::MIGRATION_THRESHOLD {
                // F2
                self.forward(FM, pkt);
                return Ok(());
            }
            // F3: frame unoccupied, migrate curpage straight in.
            let curpage = self.functional_read(FM, block_addr);
            self.functional_write(NM, nm_block_addr, curpage);
            pkt.addr = nm_addr;
            self.forward(NM, pkt);
            trace!(target: "hum::umc", "index {index}: migrate into empty frame, hotpos 0 -> {curpos}");
            self.table[index].set_hotpos(curpos);
            self.table[index].reset_counters(curpos);
            self.stats.migrations += 1;
            return Ok(());
        }

        // hotpos != 0 and curpos != hotpos.
        let c = self.table[index].inc(curpos);
        let h = self.table[index].dec(hotpos);
        if c <= h {
            // F4
            self.forward(FM, pkt);
            return Ok(());
        }

        // F5a/b/c: curpage is hotter, evict whatever occupies the NM frame.
        let curpage = self.functional_read(FM, block_addr);
        let hotpos_fm_home = self.config.base.fm_addr(index, hotpos);
        let tag = self.table[index].tag();

        if !tag {
            // F5a: two-page swap between curpage and the FM page
            // currently occupying the NM frame.
            let hotpage = self.functional_read(NM, nm_block_addr);
            self.functional_write(FM, hotpos_fm_home, hotpage);
        } else if hotpos == ratio + 1 {
            // F5b: the NM frame holds its own logical page; swap it
            // directly with curpage.
            let hotpage = self.functional_read(NM, nm_block_addr);
            self.functional_write(FM, block_addr, hotpage);
        } else {
            // F5c: three-page cycle. Move the FM page occupying hotpos
            // back to its FM home, then move the NM-resident hot content
            // there, freeing the frame for curpage.
            let tagpage = self.functional_read(FM, hotpos_fm_home);
            self.functional_write(FM, block_addr, tagpage);
            let hotpage = self.functional_read(NM, nm_block_addr);
            self.functional_write(FM, hotpos_fm_home, hotpage);
        }

        self.functional_write(NM, nm_block_addr, curpage);
        pkt.addr = nm_addr;
        self.forward(NM, pkt);
        trace!(target: "hum::umc", "index {index}: migrate, hotpos {hotpos} -> {curpos}, tag {tag}");
        self.table[index].set_hotpos(curpos);
        self.table[index].reset_counters(curpos);
        self.stats.migrations += 1;
        Ok(())
    }

    fn handle_nm_side(&mut self, mut pkt: Packet) -> HumResult<()> {
        let ratio = self.config.base.ratio();
        let index = self.config.base.nm_index(pkt.addr);
        let curpos = ratio + 1;
        let nm_block_addr = self.block_addr(pkt.addr);
        let hotpos = self.table[index].hotpos();

        if hotpos == 0 {
            // N1
            self.forward(NM, pkt);
            self.table[index].set_hotpos(curpos);
            self.table[index].set_tag(true);
            self.table[index].reset_counters(curpos);
            return Ok(());
        }

        if hotpos == curpos {
            // N2: NM logical page is already resident.
            self.table[index].inc(curpos);
            self.forward(NM, pkt);
            return Ok(());
        }

        // hotpos holds some FM page instead of the NM logical page.
        let fm_home = self.config.base.fm_addr(index, hotpos);
        let fm_addr = fm_home + (pkt.addr - self.config.base.nm_addr(index));
        let tag = self.table[index].tag();

        if !tag {
            match pkt.cmd {
                Cmd::Read => {
                    error!(target: "hum::umc", "index {index}: read of displaced NM page with no prior write (tag unset)");
                    return Err(HumError::ReadUndefined { index }); // N3
                }
                Cmd::Write => {
                    // N4
                    pkt.addr = fm_addr;
                    self.table[index].set_tag(true);
                    self.table[index].inc(curpos);
                    self.table[index].dec(hotpos);
                    self.forward(FM, pkt);
                    return Ok(());
                }
            }
        }

        let c = self.table[index].inc(curpos);
        let h = self.table[index].dec(hotpos);
        if c <= h {
            // N5
            pkt.addr = fm_addr;
            self.forward(FM, pkt);
            return Ok(());
        }

        // N6: three-step swap to reclaim the NM frame for its own logical
        // content.
        let tagpage = self.functional_read(FM, fm_home);
        let hotpage = self.functional_read(NM, nm_block_addr);
        self.functional_write(FM, fm_home, hotpage);
        self.functional_write(NM, nm_block_addr, tagpage);
        self.forward(NM, pkt);
        trace!(target: "hum::umc", "index {index}: reclaim NM frame for its own page, hotpos {hotpos} -> {curpos}");
        self.table[index].set_hotpos(curpos);
        self.table[index].reset_counters(curpos);
        self.stats.migrations += 1;
        Ok(())
    }

    fn dispatch_next(&mut self) -> HumResult<()> {
        if let Some(next) = self.pending_children.pop_front() {
            self.handle_page_request(next)
        } else {
            Ok(())
        }
    }

    fn finish(&mut self, resp: Packet) -> HumResult<()> {
        let cpu_id = self.waiting_cpu_port.take().expect("response with no outstanding request");
        self.blocked = false;
        self.cpu_ports[cpu_id].send_response(resp)?;
        for port in &mut self.cpu_ports {
            port.try_send_retry();
        }
        Ok(())
    }
}

impl RemapPolicy for UmcController {
    fn handle_request(&mut self, pkt: Packet, port: PortSide) -> HumResult<Accepted> {
        let cpu_id = match port {
            PortSide::Cpu(id) => id,
            PortSide::Mem(_) => return Err(HumError::UnknownCmd),
        };
        if self.blocked {
            debug!(target: "hum::umc", "cpu port {cpu_id} blocked, marking for retry");
            self.cpu_ports[cpu_id].mark_need_retry();
            return Err(HumError::PortBlocked);
        }
        self.blocked = true;
        self.waiting_cpu_port = Some(cpu_id);
        let mut children = self.splitter.split_request(pkt);
        let first = children.remove(0);
        self.pending_children = children.into();
        self.handle_page_request(first)?;
        Ok(Accepted)
    }

    fn handle_response(&mut self, pkt: Packet) -> HumResult<()> {
        if self.splitter.has_pending() {
            if let Some(parent_resp) = self.splitter.receive_response(pkt) {
                self.finish(parent_resp)
            } else {
                self.dispatch_next()
            }
        } else {
            self.finish(pkt)
        }
    }

    fn handle_functional(&mut self, pkt: Packet) -> HumResult<Packet> {
        // Functional accesses resolve the current mapping and rewrite the
        // address, but never mutate counters, hotpos, or tag.
        let read = pkt.cmd == Cmd::Read;
        let parent_addr = pkt.addr;
        let parent_size = pkt.size;
        let children = self.splitter.split_functional(pkt.clone());
        let mut payload = if read { vec![0u8; parent_size] } else { Vec::new() };
        for child in children {
            let child_addr = child.addr;
            let child_size = child.size;
            let resolved = self.resolve_functional(child)?;
            if read {
                let off = (child_addr - parent_addr) as usize;
                payload[off..off + child_size].copy_from_slice(&resolved.payload);
            }
        }
        let mut resp = pkt.into_response();
        if read {
            resp.payload = payload;
        }
        Ok(resp)
    }
}

impl UmcController {
    fn resolve_functional(&mut self, mut child: Packet) -> HumResult<Packet> {
        match self.config.base.classify(child.addr) {
            Some(Location::Fm) => {
                let (index, curpos) = self.config.base.fm_index_and_pos(child.addr);
                let hotpos = self.table[index].hotpos();
                let offset = child.addr % self.config.base.block_size as u64;
                if curpos == hotpos {
                    child.addr = self.config.base.nm_addr(index) + offset;
                    Ok(self.mem_ports[NM].functional(child))
                } else {
                    Ok(self.mem_ports[FM].functional(child))
                }
            }
            Some(Location::Nm) => {
                let index = self.config.base.nm_index(child.addr);
                let hotpos = self.table[index].hotpos();
                let ratio = self.config.base.ratio();
                if hotpos == 0 || hotpos == ratio + 1 {
                    Ok(self.mem_ports[NM].functional(child))
                } else {
                    let fm_home = self.config.base.fm_addr(index, hotpos);
                    child.addr = fm_home + (child.addr - self.config.base.nm_addr(index));
                    Ok(self.mem_ports[FM].functional(child))
                }
            }
            None => Err(HumError::SpanTooLarge { addr: child.addr, size: child.size }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AddrRange;
    use crate::port::{CpuTransport, MemTransport};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Backing {
        bytes: RefCell<Vec<u8>>,
    }

    impl Backing {
        fn new(len: usize) -> Rc<Self> {
            Rc::new(Self { bytes: RefCell::new(vec![0; len]) })
        }
    }

    struct Device {
        backing: Rc<Backing>,
        base: u64,
        accept: Rc<RefCell<bool>>,
        log: Rc<RefCell<Vec<Packet>>>,
    }

    impl MemTransport for Device {
        fn send_timing_req(&mut self, pkt: Packet) -> bool {
            if !*self.accept.borrow() {
                return false;
            }
            self.log.borrow_mut().push(pkt);
            true
        }

        fn send_functional(&mut self, pkt: Packet) -> Packet {
            let off = (pkt.addr - self.base) as usize;
            match pkt.cmd {
                Cmd::Read => {
                    let mut resp = pkt;
                    resp.payload = self.backing.bytes.borrow()[off..off + resp.size].to_vec();
                    resp.into_response()
                }
                Cmd::Write => {
                    self.backing.bytes.borrow_mut()[off..off + pkt.payload.len()]
                        .copy_from_slice(&pkt.payload);
                    pkt.into_response()
                }
            }
        }
    }

    struct Upstream {
        responses: Rc<RefCell<Vec<Packet>>>,
    }

    impl CpuTransport for Upstream {
        fn send_timing_resp(&mut self, pkt: Packet) -> bool {
            self.responses.borrow_mut().push(pkt);
            true
        }

        fn send_retry_req(&mut self) {}
    }

    fn build(ratio: u32) -> (UmcController, Rc<RefCell<Vec<Packet>>>) {
        let block = UmcConfig::BLOCK_SIZE as u64;
        let near = AddrRange::new(0, block * 4);
        let far = AddrRange::new(0x10_0000, 0x10_0000 + block * 4 * ratio as u64);
        let config = UmcConfig::new(near, far, 1).unwrap();

        let fm_backing = Backing::new((block * 4 * ratio as u64) as usize);
        let nm_backing = Backing::new((block * 4) as usize);
        let fm_log = Rc::new(RefCell::new(Vec::new()));
        let nm_log = Rc::new(RefCell::new(Vec::new()));
        let fm_port = MemSidePort::new(
            0,
            Box::new(Device {
                backing: fm_backing,
                base: far.start,
                accept: Rc::new(RefCell::new(true)),
                log: fm_log.clone(),
            }),
        );
        let nm_port = MemSidePort::new(
            1,
            Box::new(Device {
                backing: nm_backing,
                base: near.start,
                accept: Rc::new(RefCell::new(true)),
                log: nm_log.clone(),
            }),
        );
        let responses = Rc::new(RefCell::new(Vec::new()));
        let cpu_port = CpuSidePort::new(0, Box::new(Upstream { responses: responses.clone() }));
        (UmcController::new(config, vec![cpu_port], fm_port, nm_port), responses)
    }

    #[test]
    fn cold_fm_read_takes_f2_and_increments_counter() {
        let (mut ctrl, responses) = build(4);
        // page 5 -> index 1, curpos 2 (per spec UMC-A).
        let addr = 0x10_0000 + UmcConfig::BLOCK_SIZE as u64 * 5;
        let pkt = Packet::read(addr, 8, 1);
        ctrl.handle_request(pkt, PortSide::Cpu(0)).unwrap();
        assert_eq!(ctrl.entry(1).counter(2), 1);
        assert_eq!(ctrl.entry(1).hotpos(), 0);
        assert!(responses.borrow().is_empty());
    }

    #[test]
    fn seventh_access_migrates_then_eighth_takes_f1() {
        let (mut ctrl, responses) = build(4);
        let addr = 0x10_0000 + UmcConfig::BLOCK_SIZE as u64 * 5;
        for i in 0..7u64 {
            let pkt = Packet::read(addr, 8, i);
            ctrl.handle_request(pkt, PortSide::Cpu(0)).unwrap();
            let resp = responses.borrow_mut().pop().unwrap();
            ctrl.handle_response(resp).unwrap();
        }
        assert_eq!(ctrl.entry(1).hotpos(), 2);
        assert_eq!(ctrl.entry(1).counter(2), UmcEntry::RESET_SENTINEL);
        assert_eq!(ctrl.stats().migrations, 1);

        let pkt = Packet::read(addr, 8, 100);
        ctrl.handle_request(pkt, PortSide::Cpu(0)).unwrap();
        let resp = responses.borrow().last().unwrap();
        assert_eq!(resp.addr, ctrl.config.base.nm_addr(1));
        assert_eq!(ctrl.entry(1).counter(2), UmcEntry::RESET_SENTINEL + 1);
    }

    #[test]
    fn three_page_cycle_takes_f5c_and_migrates() {
        let (mut ctrl, responses) = build(4);
        let index = 1usize;
        // hotpos=2, tag set, R=4 so hotpos != R+1 -> three-page cycle.
        ctrl.table[index].set_hotpos(2);
        ctrl.table[index].set_tag(true);
        ctrl.table[index].reset_counters(2);
        for _ in 0..8 {
            ctrl.table[index].inc(3);
        }

        // index=1, curpos=3 -> page = (3-1)*4 + 1 = 9.
        let addr = 0x10_0000 + UmcConfig::BLOCK_SIZE as u64 * 9;
        let pkt = Packet::read(addr, 8, 1);
        ctrl.handle_request(pkt, PortSide::Cpu(0)).unwrap();

        assert_eq!(ctrl.entry(index).hotpos(), 3);
        assert_eq!(ctrl.entry(index).counter(3), UmcEntry::RESET_SENTINEL);
        assert_eq!(ctrl.stats().migrations, 1);
        let resp = responses.borrow().last().unwrap();
        assert_eq!(resp.addr, ctrl.config.base.nm_addr(index));
    }

    #[test]
    fn single_outstanding_request_is_rejected() {
        let (mut ctrl, _responses) = build(4);
        let addr = 0x10_0000 + UmcConfig::BLOCK_SIZE as u64 * 5;
        ctrl.handle_request(Packet::read(addr, 8, 1), PortSide::Cpu(0)).unwrap();
        let err = ctrl.handle_request(Packet::read(addr, 8, 2), PortSide::Cpu(0)).unwrap_err();
        assert_eq!(err, HumError::PortBlocked);
    }
}
