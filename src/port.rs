//! Port fabric: CPU-side inbound and mem-side outbound request/response
//! plumbing with blocking flow control.
//!
//! Grounded on the original `CPUSidePort`/`MemSidePort` pair, reshaped from
//! inheritance into the Rust idiom used elsewhere in this crate's lineage
//! for "things with one name but several backends": a thin trait plus
//! owned state (`Box<dyn Trait>`), not a class hierarchy. Both port kinds
//! are owned exclusively by the controller; per Design Note "Cyclic
//! ownership" they never hold a reference back to it; the controller
//! drives them and they drive their transport.

use crate::error::{HumError, HumResult};
use crate::packet::Packet;

/// The downstream (memory) side of a port: accepts timing requests,
/// answers functional ones synchronously.
pub trait MemTransport {
    /// Attempt to accept `pkt` for timing delivery. `false` means the
    /// device is currently unable to accept it; the port records it and
    /// resends on `recv_req_retry`.
    fn send_timing_req(&mut self, pkt: Packet) -> bool;

    /// Synchronous, tick-less access used for swap/migration machinery.
    /// For reads, the returned packet's `payload` is populated; for
    /// writes, the payload is whatever the caller supplied.
    fn send_functional(&mut self, pkt: Packet) -> Packet;
}

/// The upstream (CPU) side of a port: delivers timing responses.
pub trait CpuTransport {
    /// Attempt to deliver a response. `false` means the CPU side was not
    /// ready; the port records it and resends on `try_send_retry`.
    fn send_timing_resp(&mut self, pkt: Packet) -> bool;

    /// Notify the CPU side it may retry a previously declined request.
    fn send_retry_req(&mut self);
}

/// One memory-side connection (NM or FM, depending on policy).
pub struct MemSidePort {
    id: usize,
    device: Box<dyn MemTransport>,
    blocked_packet: Option<Packet>,
}

impl MemSidePort {
    pub fn new(id: usize, device: Box<dyn MemTransport>) -> Self {
        Self { id, device, blocked_packet: None }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Send a timing request. Returns `HumError::SendFailed` if the
    /// transport declined it; the packet is retained for `recv_req_retry`.
    pub fn send_packet(&mut self, pkt: Packet) -> HumResult<()> {
        if self.blocked_packet.is_some() {
            return Err(HumError::SendFailed);
        }
        if self.device.send_timing_req(pkt.clone()) {
            Ok(())
        } else {
            self.blocked_packet = Some(pkt);
            Err(HumError::SendFailed)
        }
    }

    /// Called when the transport signals it can accept a send again.
    pub fn recv_req_retry(&mut self) {
        if let Some(pkt) = self.blocked_packet.take() {
            if !self.device.send_timing_req(pkt.clone()) {
                self.blocked_packet = Some(pkt);
            }
        }
    }

    pub fn functional(&mut self, pkt: Packet) -> Packet {
        self.device.send_functional(pkt)
    }

    pub fn has_retry_pending(&self) -> bool {
        self.blocked_packet.is_some()
    }
}

/// One CPU-side connection. Several may share a controller (inst + data
/// ports in the reference deployment); count is a construction parameter,
/// not hardcoded.
pub struct CpuSidePort {
    id: usize,
    upstream: Box<dyn CpuTransport>,
    need_retry: bool,
    blocked_packet: Option<Packet>,
}

impl CpuSidePort {
    pub fn new(id: usize, upstream: Box<dyn CpuTransport>) -> Self {
        Self { id, upstream, need_retry: false, blocked_packet: None }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Mark that this port must be retried once the controller unblocks.
    pub fn mark_need_retry(&mut self) {
        self.need_retry = true;
    }

    /// Fire `RetryReq` upstream if one was deferred.
    pub fn try_send_retry(&mut self) {
        if self.need_retry {
            self.need_retry = false;
            self.upstream.send_retry_req();
        }
    }

    /// Deliver a response, retaining it for `recv_resp_retry` on failure.
    pub fn send_response(&mut self, pkt: Packet) -> HumResult<()> {
        if self.upstream.send_timing_resp(pkt.clone()) {
            Ok(())
        } else {
            self.blocked_packet = Some(pkt);
            Err(HumError::SendFailed)
        }
    }

    pub fn recv_resp_retry(&mut self) {
        if let Some(pkt) = self.blocked_packet.take() {
            if !self.upstream.send_timing_resp(pkt.clone()) {
                self.blocked_packet = Some(pkt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingMem {
        accept: bool,
        sent: Rc<RefCell<Vec<Packet>>>,
    }

    impl MemTransport for RecordingMem {
        fn send_timing_req(&mut self, pkt: Packet) -> bool {
            if self.accept {
                self.sent.borrow_mut().push(pkt);
            }
            self.accept
        }

        fn send_functional(&mut self, pkt: Packet) -> Packet {
            pkt.into_response()
        }
    }

    #[test]
    fn send_failure_retains_packet_for_retry() {
        use crate::packet::Packet;
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut port = MemSidePort::new(0, Box::new(RecordingMem { accept: false, sent: sent.clone() }));
        let pkt = Packet::read(0, 8, 1);
        assert_eq!(port.send_packet(pkt), Err(HumError::SendFailed));
        assert!(port.has_retry_pending());
        assert!(sent.borrow().is_empty());
    }
}
