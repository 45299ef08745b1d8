// Ledger module - THE BOOKS
// Settled balance, pending entries, settlement and the sending-side PIN

mod book;
mod entry;
pub mod pin;
mod state;

pub use book::{LedgerConfig, LedgerError, OfflineLedger};
pub use entry::{Direction, EntryId, EntryStatus, PendingEntry};
pub use state::LedgerState;
