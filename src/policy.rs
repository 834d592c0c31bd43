//! The capability shared by both policy engines.
//!
//! Per Design Note "Polymorphism": UMC and SILC are peer implementations of
//! a common capability rather than a class hierarchy with a shared base.

use crate::error::HumResult;
use crate::packet::Packet;

/// Which mem-side port a packet is headed to or arrived from. The mapping
/// to NM/FM is policy-specific (`Config::classify` plus each engine's own
/// redirect logic resolves the tier; this enum just names the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemPort {
    Zero,
    One,
}

/// Where a packet originates: a numbered CPU port, or (for a downstream
/// engine chained behind another) a mem-side port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSide {
    Cpu(usize),
    Mem(MemPort),
}

/// Returned by `handle_request` once the engine has accepted a packet onto
/// its single-outstanding slot and dispatched (or is about to dispatch) the
/// timing packet downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted;

/// The remapping-and-migration state machine contract both UMC and SILC
/// implement.
pub trait RemapPolicy {
    /// Accept an incoming block-aligned page packet. Returns
    /// `Err(HumError::PortBlocked)` if a request is already outstanding.
    fn handle_request(&mut self, pkt: Packet, port: PortSide) -> HumResult<Accepted>;

    /// Handle the timing response to the single outstanding downstream
    /// request, recombine with the splitter, and deliver upstream.
    fn handle_response(&mut self, pkt: Packet) -> HumResult<()>;

    /// Resolve and forward a packet through the functional (synchronous,
    /// tick-less) path, returning the completed packet (payload filled in
    /// for reads). Never mutates hotness counters, locks, or the aging
    /// counter — only rewrites the address per the current mapping.
    fn handle_functional(&mut self, pkt: Packet) -> HumResult<Packet>;
}
