//! Remapping-and-migration policy engines for a hybrid near/far memory
//! hierarchy: [`umc::UmcController`] (set-associative, saturating hotness
//! counters) and [`silc::SilcController`] (4-way associative, page-granular
//! locking with sub-block swapping). Both implement the shared
//! [`policy::RemapPolicy`] contract and can be driven independently or
//! chained, per `config::HumConfig`'s addressing split between near and far
//! memory.

pub mod config;
pub mod error;
pub mod logging;
pub mod mem_device;
pub mod packet;
pub mod policy;
pub mod port;
pub mod silc;
pub mod splitter;
pub mod stats;
pub mod umc;

pub use config::{HumConfig, SilcConfig, UmcConfig};
pub use error::{HumError, HumResult};
pub use packet::{Cmd, Packet};
pub use policy::RemapPolicy;
pub use silc::SilcController;
pub use umc::UmcController;
