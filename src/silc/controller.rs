//! SILC policy engine: 4-way associative remap table with page-granular
//! locking and 64 B sub-block swapping.
//!
//! Grounded on `silc.cc::handleRequest`/`handleFunctional` (CASE1-CASE12)
//! and `swapSubblk`/`lockPage`/`restorePage`. Port convention, matching the
//! actual `memPorts[0].sendPacket`/`memPorts[1].sendPacket` call sites (not
//! the separately declared and internally inconsistent `redirectReq`):
//! `mem_ports[0]` is NM, `mem_ports[1]` is FM.

use std::collections::VecDeque;

use log::{debug, error, trace};

use crate::config::{Location, SilcConfig};
use crate::error::{HumError, HumResult};
use crate::packet::{Cmd, Packet};
use crate::policy::{Accepted, PortSide, RemapPolicy};
use crate::port::{CpuSidePort, MemSidePort};
use crate::splitter::Splitter;
use crate::stats::SilcStats;

use super::entry::SilcEntry;
use super::history::HistoryTable;

const NM: usize = 0;
const FM: usize = 1;

pub struct SilcController {
    config: SilcConfig,
    table: Vec<SilcEntry>,
    history: HistoryTable,
    stats: SilcStats,
    cpu_ports: Vec<CpuSidePort>,
    mem_ports: [MemSidePort; 2],
    blocked: bool,
    waiting_cpu_port: Option<usize>,
    splitter: Splitter,
    pending_children: VecDeque<Packet>,
    aging_counter: u64,
    /// Logical clock bumped once per accepted request, used as `lruinfo`.
    /// The original keys this off `curTick()`; since this crate has no
    /// notion of simulator ticks, an internal counter gives the same total
    /// order without threading a tick parameter through `RemapPolicy`.
    clock: u64,
}

impl SilcController {
    pub fn new(
        config: SilcConfig,
        cpu_ports: Vec<CpuSidePort>,
        nm_port: MemSidePort,
        fm_port: MemSidePort,
    ) -> Self {
        let frame_count = config.base.frame_count();
        Self {
            config,
            table: (0..frame_count).map(|_| SilcEntry::new()).collect(),
            history: HistoryTable::new(SilcConfig::HISTORY_CAPACITY),
            stats: SilcStats::default(),
            cpu_ports,
            mem_ports: [nm_port, fm_port],
            blocked: false,
            waiting_cpu_port: None,
            splitter: Splitter::new(SilcConfig::BLOCK_SIZE),
            pending_children: VecDeque::new(),
            aging_counter: 0,
            clock: 0,
        }
    }

    pub fn stats(&self) -> &SilcStats {
        &self.stats
    }

    pub fn entry(&self, index: usize) -> &SilcEntry {
        &self.table[index]
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn block_addr(&self, addr: u64) -> u64 {
        let b = SilcConfig::BLOCK_SIZE as u64;
        addr - (addr % b)
    }

    /// Forward a rewritten timing packet downstream. `MemSidePort` already
    /// retains a declined send and resends it on `recv_req_retry`, so this
    /// access stays accepted either way (matching the original's `void
    /// sendPacket`, which never aborts `handleRequest`).
    fn forward(&mut self, side: usize, pkt: Packet) {
        if self.mem_ports[side].send_packet(pkt).is_err() {
            debug!(target: "hum::silc", "mem port {side} declined send, queued for retry");
        }
    }

    fn functional_read(&mut self, side: usize, addr: u64, size: usize) -> Vec<u8> {
        let pkt = Packet::read(addr, size, 0);
        let resp = self.mem_ports[side].functional(pkt);
        if side == NM {
            self.stats.traffic.record_nm_read();
        } else {
            self.stats.traffic.record_fm_read();
        }
        resp.payload
    }

    fn functional_write(&mut self, side: usize, addr: u64, payload: Vec<u8>) {
        let pkt = Packet::write(addr, payload, 0);
        self.mem_ports[side].functional(pkt);
        if side == NM {
            self.stats.traffic.record_nm_write();
        } else {
            self.stats.traffic.record_fm_write();
        }
    }

    /// Exchange the contents of one 64 B sub-block between NM and FM.
    fn swap_subblk(&mut self, nm_addr: u64, fm_addr: u64) {
        let sub = SilcConfig::SUB_BLOCK_SIZE;
        let nm_data = self.functional_read(NM, nm_addr, sub);
        let fm_data = self.functional_read(FM, fm_addr, sub);
        self.functional_write(NM, nm_addr, fm_data);
        self.functional_write(FM, fm_addr, nm_data);
        self.stats.swaps += 1;
        trace!(target: "hum::silc", "swapped sub-block nm={nm_addr:#x} <-> fm={fm_addr:#x}");
    }

    /// Force every sub-block into (`flag = true`) or out of (`flag =
    /// false`) residency in the NM frame, bringing the whole page's
    /// bitvector to all-1s or all-0s. Returns the number of sub-blocks
    /// actually swapped.
    fn lock_page(&mut self, index: usize, nm_addr: u64, flag: bool) -> u32 {
        let sub = SilcConfig::SUB_BLOCK_SIZE as u64;
        let mut swapped = 0;
        for i in 0..self.config.sub_blocks_per_page() as u32 {
            let valid = self.table[index].bit(i);
            if flag == valid {
                continue;
            }
            let fm_addr = self.table[index].remap() + i as u64 * sub;
            let nm_sub = nm_addr + i as u64 * sub;
            self.swap_subblk(nm_sub, fm_addr);
            self.table[index].set_bit(i, flag);
            swapped += 1;
        }
        swapped
    }

    /// Swap every currently-resident sub-block of `index`'s frame back out
    /// to its FM home, in preparation for handing the frame to another page.
    fn restore_page(&mut self, index: usize, nm_addr: u64) -> u32 {
        let sub = SilcConfig::SUB_BLOCK_SIZE as u64;
        let mut swapped = 0;
        for i in 0..self.config.sub_blocks_per_page() as u32 {
            if !self.table[index].bit(i) {
                continue;
            }
            let fm_addr = self.table[index].remap() + i as u64 * sub;
            let nm_sub = nm_addr + i as u64 * sub;
            self.swap_subblk(nm_sub, fm_addr);
            swapped += 1;
        }
        swapped
    }

    fn tick_aging(&mut self) {
        if self.aging_counter < SilcConfig::AGING_PERIOD {
            self.aging_counter += 1;
        } else {
            self.aging_counter = 0;
            for entry in &mut self.table {
                entry.age();
            }
            self.stats.aging_resets += 1;
            trace!(target: "hum::silc", "aging period elapsed: counters halved, locks cleared");
        }
    }

    fn handle_page_request(&mut self, pkt: Packet) -> HumResult<()> {
        match self.config.base.classify(pkt.addr) {
            Some(Location::Nm) => self.handle_nm_side(pkt),
            Some(Location::Fm) => self.handle_fm_side(pkt),
            None => {
                error!(target: "hum::silc", "address {:#x} (size {}) falls outside both tiers", pkt.addr, pkt.size);
                Err(HumError::SpanTooLarge { addr: pkt.addr, size: pkt.size })
            }
        }
    }

    fn handle_nm_side(&mut self, mut pkt: Packet) -> HumResult<()> {
        let sub = SilcConfig::SUB_BLOCK_SIZE as u64;
        let index = self.config.base.nm_index(pkt.addr);
        let page_addr = self.block_addr(pkt.addr);
        let subblock_num = ((pkt.addr - page_addr) / sub) as u32;
        let tick = self.clock;

        if self.table[index].is_unmapped() {
            // CASE1: this frame holds only its own content.
            self.forward(NM, pkt);
            let over = self.table[index].inc_nm();
            if over && !self.table[index].locked() {
                self.table[index].set_locked(true);
            }
        } else if self.config.base.far_mem.contains(self.table[index].remap()) {
            if self.table[index].locked() {
                // CASE2: frame is pinned to the remapped FM page; can't
                // swap, redirect straight to FM.
                let fm_addr = self.table[index].remap() + (pkt.addr - page_addr);
                pkt.addr = fm_addr;
                self.forward(FM, pkt);
                self.table[index].inc_nm();
            } else {
                // CASE3/CASE4: this subblock's own content may currently be
                // displaced out to FM; bring it back before serving from NM.
                if self.table[index].bit(subblock_num) {
                    let nm_sub = page_addr + subblock_num as u64 * sub;
                    let fm_sub = self.table[index].remap() + subblock_num as u64 * sub;
                    self.swap_subblk(nm_sub, fm_sub);
                    self.table[index].set_bit(subblock_num, false);
                }
                self.forward(NM, pkt);
                let over = self.table[index].inc_nm();
                if over && !self.table[index].locked() {
                    self.lock_page(index, page_addr, false);
                    self.table[index].set_locked(true);
                    self.table[index].set_remap(0);
                }
            }
        } else {
            let remap = self.table[index].remap();
            error!(target: "hum::silc", "index {index}: remap field {remap:#x} is neither 0 nor within FM range");
            return Err(HumError::UnknownRemap { remap });
        }
        self.table[index].set_lruinfo(tick);
        Ok(())
    }

    fn handle_fm_side(&mut self, mut pkt: Packet) -> HumResult<()> {
        let sub = SilcConfig::SUB_BLOCK_SIZE as u64;
        let page_addr = self.block_addr(pkt.addr);
        let subblock_num = ((pkt.addr - page_addr) / sub) as u32;
        let (raw_index, _) = self.config.base.fm_index_and_pos(pkt.addr);
        let assoc = SilcConfig::ASSOCIATIVITY;
        let set_base = raw_index - (raw_index % assoc);
        let tick = self.clock;

        let mut matched = None;
        let mut lru_index = None;
        let mut lru_tick = u64::MAX;
        for index in set_base..set_base + assoc {
            self.stats.queries += 1;
            if self.table[index].remap() == page_addr {
                matched = Some(index);
            }
            if lru_tick > self.table[index].lruinfo() && !self.table[index].locked() {
                lru_tick = self.table[index].lruinfo();
                lru_index = Some(index);
            }
        }

        if let Some(index) = matched {
            let nm_page = self.config.base.nm_addr(index);
            let nm_addr = nm_page + (pkt.addr - page_addr);
            if self.table[index].locked() {
                // CASE5
                pkt.addr = nm_addr;
                self.forward(NM, pkt);
                self.table[index].inc_fm();
            } else {
                if !self.table[index].bit(subblock_num) {
                    // CASE6/CASE7
                    let nm_sub = nm_page + subblock_num as u64 * sub;
                    let fm_sub = page_addr + subblock_num as u64 * sub;
                    self.swap_subblk(nm_sub, fm_sub);
                    self.table[index].set_bit(subblock_num, true);
                }
                pkt.addr = nm_addr;
                self.forward(NM, pkt);
                let over = self.table[index].inc_fm();
                if over && !self.table[index].locked() {
                    // CASE6-7-LOCK
                    self.lock_page(index, nm_page, true);
                    self.table[index].set_locked(true);
                }
            }
            self.table[index].set_lruinfo(tick);
            return Ok(());
        }

        match lru_index {
            None => {
                // CASE8: every way in the set is locked; forward unchanged.
                self.forward(FM, pkt);
            }
            Some(victim) => {
                let nm_page = self.config.base.nm_addr(victim);
                let nm_addr = nm_page + (pkt.addr - page_addr);
                if !self.table[victim].is_unmapped() {
                    // CASE10: evict whatever this frame currently shadows,
                    // remembering which sub-blocks it had pulled in.
                    self.restore_page(victim, nm_page);
                    let old_bvt = self.table[victim].bvt_index();
                    if old_bvt != 0 {
                        self.history.insert(old_bvt, self.table[victim].bitvector());
                    }
                }
                let new_bvt = pkt.pc ^ page_addr;
                self.table[victim].claim(page_addr, new_bvt, tick);
                if let Some(bv) = self.history.get(new_bvt) {
                    // CASE11: this (PC, page) pair was seen before; restore
                    // the sub-blocks it had resident last time.
                    self.table[victim].set_bitvector(bv);
                    self.restore_page(victim, nm_page);
                }
                if !self.table[victim].bit(subblock_num) {
                    // CASE12
                    let nm_sub = nm_page + subblock_num as u64 * sub;
                    let fm_sub = page_addr + subblock_num as u64 * sub;
                    self.swap_subblk(nm_sub, fm_sub);
                    self.table[victim].set_bit(subblock_num, true);
                }
                pkt.addr = nm_addr;
                self.forward(NM, pkt);
                self.table[victim].inc_fm();
            }
        }
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

    fn resolve_functional(&mut self, mut child: Packet) -> HumResult<Packet> {
        match self.config.base.classify(child.addr) {
            Some(Location::Nm) => {
                let index = self.config.base.nm_index(child.addr);
                let page_addr = self.block_addr(child.addr);
                if self.table[index].is_unmapped() {
                    return Ok(self.mem_ports[NM].functional(child));
                }
                if !self.config.base.far_mem.contains(self.table[index].remap()) {
                    return Err(HumError::UnknownRemap { remap: self.table[index].remap() });
                }
                let fm_addr = self.table[index].remap() + (child.addr - page_addr);
                if self.table[index].locked() {
                    child.addr = fm_addr;
                    return Ok(self.mem_ports[FM].functional(child));
                }
                let sub = SilcConfig::SUB_BLOCK_SIZE as u64;
                let subblock_num = ((child.addr - page_addr) / sub) as u32;
                if self.table[index].bit(subblock_num) {
                    child.addr = fm_addr;
                    Ok(self.mem_ports[FM].functional(child))
                } else {
                    Ok(self.mem_ports[NM].functional(child))
                }
            }
            Some(Location::Fm) => {
                let page_addr = self.block_addr(child.addr);
                let (raw_index, _) = self.config.base.fm_index_and_pos(child.addr);
                let assoc = SilcConfig::ASSOCIATIVITY;
                let set_base = raw_index - (raw_index % assoc);
                let mut matched = None;
                for index in set_base..set_base + assoc {
                    if self.table[index].remap() == page_addr {
                        matched = Some(index);
                        break;
                    }
                }
                match matched {
                    Some(index) => {
                        let nm_page = self.config.base.nm_addr(index);
                        let nm_addr = nm_page + (child.addr - page_addr);
                        if self.table[index].locked() {
                            child.addr = nm_addr;
                            return Ok(self.mem_ports[NM].functional(child));
                        }
                        let sub = SilcConfig::SUB_BLOCK_SIZE as u64;
                        let subblock_num = ((child.addr - page_addr) / sub) as u32;
                        if self.table[index].bit(subblock_num) {
                            child.addr = nm_addr;
                            Ok(self.mem_ports[NM].functional(child))
                        } else {
                            Ok(self.mem_ports[FM].functional(child))
                        }
                    }
                    None => Ok(self.mem_ports[FM].functional(child)),
                }
            }
            None => Err(HumError::SpanTooLarge { addr: child.addr, size: child.size }),
        }
    }
}

impl RemapPolicy for SilcController {
    fn handle_request(&mut self, pkt: Packet, port: PortSide) -> HumResult<Accepted> {
        let cpu_id = match port {
            PortSide::Cpu(id) => id,
            PortSide::Mem(_) => return Err(HumError::UnknownCmd),
        };
        if self.blocked {
            debug!(target: "hum::silc", "cpu port {cpu_id} blocked, marking for retry");
            self.cpu_ports[cpu_id].mark_need_retry();
            return Err(HumError::PortBlocked);
        }
        self.blocked = true;
        self.waiting_cpu_port = Some(cpu_id);
        self.tick_aging();
        // Pre-increment so the first request's tick is 1, never colliding
        // with a never-touched entry's zero-valued `lruinfo` sentinel.
        self.clock += 1;
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
