//! UMC: set-associative remapping with saturating hotness counters.

mod controller;
mod entry;

pub use controller::UmcController;
pub use entry::UmcEntry;
