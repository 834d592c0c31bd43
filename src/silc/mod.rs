//! SILC: 4-way associative remapping with page-granular locking and
//! sub-block swapping.

mod controller;
mod entry;
mod history;

pub use controller::SilcController;
pub use entry::SilcEntry;
pub use history::HistoryTable;
