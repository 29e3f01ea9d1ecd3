//! Credit grant storage with a unique claim per source.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::source::CreditSource;
use crate::types::{CreditId, EntryId, TenantId, WalletId};
use crate::{Error, Result};

/// A granted non-usage credit and the ledger line it produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditEntry {
    pub id: CreditId,
    pub tenant_id: TenantId,
    pub wallet_id: WalletId,
    pub amount: Decimal,
    pub currency: String,
    pub source: CreditSource,
    pub description: String,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub ledger_entry_id: EntryId,
    pub created_at: DateTime<Utc>,
}

/// Insert-only credit storage.
///
/// `claim` reserves the `(source type, source id)` slot; it is the uniqueness
/// constraint that prevents paying the same source twice.
#[async_trait::async_trait]
pub trait CreditStore: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with `InvalidSourceState` if the source is claimed or credited.
    async fn claim(&self, source: &CreditSource) -> Result<()>;

    /// Frees a claim whose ledger credit did not happen.
    async fn release(&self, source: &CreditSource) -> Result<()>;

    /// Stores the grant under its claimed source.
    async fn complete(&self, entry: CreditEntry) -> Result<CreditEntry>;

    async fn find_by_source(&self, source: &CreditSource) -> Result<Option<CreditEntry>>;

    async fn list(&self, tenant: &TenantId) -> Result<Vec<CreditEntry>>;
}

#[derive(Debug, Clone)]
enum Slot {
    Claimed,
    Credited(Box<CreditEntry>),
}

#[derive(Debug, Default)]
pub struct MemoryCreditStore {
    slots: DashMap<CreditSource, Slot>,
}

impl MemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn already_credited(source: &CreditSource) -> Error {
    Error::InvalidSourceState {
        source_ref: source.to_string(),
        state: "already credited".to_string(),
    }
}

#[async_trait::async_trait]
impl CreditStore for MemoryCreditStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn claim(&self, source: &CreditSource) -> Result<()> {
        match self.slots.entry(source.clone()) {
            Entry::Occupied(_) => Err(already_credited(source)),
            Entry::Vacant(slot) => {
                slot.insert(Slot::Claimed);
                Ok(())
            }
        }
    }

    async fn release(&self, source: &CreditSource) -> Result<()> {
        self.slots
            .remove_if(source, |_, slot| matches!(slot, Slot::Claimed));
        Ok(())
    }

    async fn complete(&self, entry: CreditEntry) -> Result<CreditEntry> {
        match self.slots.get_mut(&entry.source) {
            Some(mut slot) if matches!(*slot, Slot::Claimed) => {
                *slot = Slot::Credited(Box::new(entry.clone()));
                Ok(entry)
            }
            Some(_) => Err(Error::immutable("credit_entry", entry.id)),
            None => Err(Error::InvalidSourceState {
                source_ref: entry.source.to_string(),
                state: "not claimed".to_string(),
            }),
        }
    }

    async fn find_by_source(&self, source: &CreditSource) -> Result<Option<CreditEntry>> {
        Ok(self.slots.get(source).and_then(|slot| match slot.value() {
            Slot::Credited(entry) => Some((**entry).clone()),
            Slot::Claimed => None,
        }))
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<CreditEntry>> {
        let mut entries: Vec<CreditEntry> = self
            .slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Credited(entry) if &entry.tenant_id == tenant => Some((**entry).clone()),
                _ => None,
            })
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}
