//! Non-usage balance increases: refunds, dispute payouts, compensation,
//! promotional bonuses and migrated balances.
//!
//! Each grant is tied to exactly one [`CreditSource`] and produces exactly
//! one ledger line.

mod grant;
mod source;
mod store;

pub use grant::CreditLedger;
pub use source::{CreditSource, SourceResolver, SourceState, StaticSourceResolver};
pub use store::{CreditEntry, CreditStore, MemoryCreditStore};
