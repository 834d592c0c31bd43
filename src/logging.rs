//! Structured diagnostics for the HUM controllers, built on the `log`
//! facade rather than a hand-rolled ring buffer: this crate targets hosted
//! `std` environments (test harnesses, simulators), not bare metal.
//!
//! Target naming mirrors the module emitting the record: `hum::umc`,
//! `hum::silc`, `hum::port`. Swap/migration events log at `trace!` with the
//! full before/after remap entry; recoverable port conditions (`PortBlocked`,
//! `SendFailed`) log at `debug!`; invariant violations log at `error!`
//! before being returned to the caller as a `HumError`. This crate never
//! installs a logger itself — that's the host's responsibility (see
//! `tests/common` for the test harness's `env_logger` setup).
