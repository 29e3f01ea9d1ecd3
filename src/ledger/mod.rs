//! Wallet balances and the append-only ledger that explains them.
//!
//! Every balance change goes through [`LedgerStore`]; there is no other write
//! path to a [`Wallet`]. Completed and failed entries are sealed, so
//! corrections are always new entries.

mod entry;
mod memory;
mod store;
mod wallet;

pub use entry::{EntryKind, EntryStatus, LedgerCredit, LedgerDebit, LedgerEntry};
pub use memory::MemoryLedgerStore;
pub use store::{Affordability, LedgerQuery, LedgerStore, Reconciliation};
pub use wallet::Wallet;
