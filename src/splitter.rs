//! Splits packets spanning more than one page-aligned block into
//! block-aligned children, and recombines their responses.
//!
//! Grounded on spec §4.3. Only one split can be outstanding at a time
//! (single-outstanding invariant, Design Note "Polymorphism" / §5): the
//! controller drives at most one accepted request, so a single pending
//! slot is enough — no handle-keyed table is needed.

use crate::packet::{Cmd, Packet};

struct PendingSplit {
    parent: Packet,
    remaining: usize,
}

pub struct Splitter {
    block_size: usize,
    pending: Option<PendingSplit>,
}

impl Splitter {
    pub fn new(block_size: usize) -> Self {
        Self { block_size, pending: None }
    }

    /// Split `pkt` into block-aligned children sharing its `req_handle`.
    /// If `pkt` does not span a block boundary, returns a single child
    /// equal to `pkt` and registers no pending split.
    pub fn split_request(&mut self, pkt: Packet) -> Vec<Packet> {
        let children = self.make_children(&pkt);
        if children.len() > 1 {
            let mut parent = pkt;
            if parent.cmd == Cmd::Read {
                parent.payload = vec![0u8; parent.size];
            }
            self.pending = Some(PendingSplit { parent, remaining: children.len() });
        }
        children
    }

    /// Split `pkt` into block-aligned children for the functional path.
    /// Unlike `split_request`, never registers a pending recombination —
    /// functional children complete in-line and the caller reassembles
    /// the parent itself.
    pub fn split_functional(&self, pkt: Packet) -> Vec<Packet> {
        self.make_children(&pkt)
    }

    fn make_children(&self, pkt: &Packet) -> Vec<Packet> {
        let b = self.block_size as u64;
        let first_block = pkt.addr - (pkt.addr % b);
        let end = pkt.end_addr();
        let mut children = Vec::new();
        let mut block_start = first_block;
        while block_start < end {
            let block_end = block_start + b;
            let c_start = pkt.addr.max(block_start);
            let c_end = end.min(block_end);
            let c_size = (c_end - c_start) as usize;
            let payload = match pkt.cmd {
                Cmd::Write => {
                    let off = (c_start - pkt.addr) as usize;
                    pkt.payload[off..off + c_size].to_vec()
                }
                Cmd::Read => Vec::new(),
            };
            children.push(Packet {
                addr: c_start,
                size: c_size,
                cmd: pkt.cmd,
                payload,
                req_handle: pkt.req_handle,
                is_response: false,
                pc: pkt.pc,
            });
            block_start = block_end;
        }
        children
    }

    /// Fold in one child's response. Returns `Some(parent_response)` once
    /// every child has reported back.
    pub fn receive_response(&mut self, child: Packet) -> Option<Packet> {
        let pending = self.pending.as_mut()?;
        if pending.parent.req_handle != child.req_handle {
            return None;
        }
        if pending.parent.cmd == Cmd::Read {
            let off = (child.addr - pending.parent.addr) as usize;
            pending.parent.payload[off..off + child.size].copy_from_slice(&child.payload);
        }
        pending.remaining -= 1;
        if pending.remaining == 0 {
            let parent = self.pending.take().unwrap().parent;
            Some(parent.into_response())
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
