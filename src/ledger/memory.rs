//! In-memory ledger store (for testing and single-instance deployments).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::entry::{EntryStatus, LedgerCredit, LedgerDebit, LedgerEntry};
use super::store::{Affordability, LedgerQuery, LedgerStore};
use super::wallet::Wallet;
use crate::types::money::{checked_sum, ensure_positive};
use crate::types::{EntryId, TenantId};
use crate::{Error, Result};

#[derive(Debug)]
struct WalletBook {
    wallet: Wallet,
    entries: Vec<LedgerEntry>,
}

impl WalletBook {
    fn position(&self, id: &EntryId) -> Option<usize> {
        self.entries.iter().rposition(|e| &e.id == id)
    }
}

/// Wallets guarded by one async mutex each; idempotency keys live in a
/// global index claimed atomically while the wallet lock is held.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    books: DashMap<TenantId, Arc<Mutex<WalletBook>>>,
    idempotency: DashMap<String, LedgerEntry>,
    entry_index: DashMap<EntryId, TenantId>,
    sequence: AtomicU64,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wallet_count(&self) -> usize {
        self.books.len()
    }

    fn book(&self, tenant: &TenantId) -> Result<Arc<Mutex<WalletBook>>> {
        self.books
            .get(tenant)
            .map(|b| Arc::clone(&b))
            .ok_or_else(|| Error::WalletNotFound {
                tenant: tenant.clone(),
            })
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Builds the entry and, when keyed, claims the key in the same step so a
    /// concurrent writer with the same key observes `DuplicateRequest`.
    fn seal_new_entry(
        &self,
        key: Option<&String>,
        build: impl FnOnce(u64) -> LedgerEntry,
    ) -> Result<LedgerEntry> {
        let Some(key) = key else {
            return Ok(build(self.next_sequence()));
        };
        match self.idempotency.entry(key.clone()) {
            Entry::Occupied(existing) => Err(Error::DuplicateRequest {
                key: key.clone(),
                original: Box::new(existing.get().clone()),
            }),
            Entry::Vacant(slot) => {
                let entry = build(self.next_sequence());
                slot.insert(entry.clone());
                Ok(entry)
            }
        }
    }

    fn index(&self, entry: &LedgerEntry) {
        self.entry_index.insert(entry.id, entry.tenant_id.clone());
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open_wallet(&self, tenant: &TenantId, currency: &str) -> Result<Wallet> {
        let book = Arc::clone(
            &self
                .books
                .entry(tenant.clone())
                .or_insert_with(|| {
                    tracing::info!(tenant = %tenant, currency, "Opened wallet");
                    Arc::new(Mutex::new(WalletBook {
                        wallet: Wallet::new(tenant.clone(), currency),
                        entries: Vec::new(),
                    }))
                }),
        );
        let book = book.lock().await;
        if book.wallet.currency != currency {
            return Err(Error::CurrencyMismatch {
                wallet: book.wallet.currency.clone(),
                operation: currency.to_string(),
            });
        }
        Ok(book.wallet.clone())
    }

    async fn wallet(&self, tenant: &TenantId) -> Result<Option<Wallet>> {
        let Some(book) = self.books.get(tenant).map(|b| Arc::clone(&b)) else {
            return Ok(None);
        };
        let book = book.lock().await;
        Ok(Some(book.wallet.clone()))
    }

    async fn set_wallet_active(&self, tenant: &TenantId, active: bool) -> Result<Wallet> {
        let book = self.book(tenant)?;
        let mut book = book.lock().await;
        book.wallet.active = active;
        tracing::info!(tenant = %tenant, active, "Wallet activity changed");
        Ok(book.wallet.clone())
    }

    async fn credit(&self, tenant: &TenantId, credit: LedgerCredit) -> Result<LedgerEntry> {
        let amount = ensure_positive(credit.amount)?;
        let book = self.book(tenant)?;
        let mut book = book.lock().await;

        let now = Utc::now();
        let mut next = book.wallet.clone();
        let (balance_before, balance_after) = next.apply(amount, now)?;
        let wallet = &book.wallet;
        let entry = self.seal_new_entry(credit.idempotency_key.as_ref(), |sequence| {
            LedgerEntry {
                id: EntryId::new(),
                sequence,
                wallet_id: wallet.id,
                tenant_id: tenant.clone(),
                kind: credit.kind,
                amount,
                balance_before,
                balance_after,
                currency: wallet.currency.clone(),
                description: credit.description.clone(),
                reference: credit.reference.clone(),
                metadata: credit.metadata.clone(),
                status: EntryStatus::Completed,
                idempotency_key: credit.idempotency_key.clone(),
                created_at: now,
                completed_at: Some(now),
            }
        })?;

        book.wallet = next;
        debug_assert_eq!(book.wallet.balance, entry.balance_after);
        book.entries.push(entry.clone());
        self.index(&entry);

        tracing::info!(
            tenant = %tenant,
            entry_id = %entry.id,
            kind = %entry.kind,
            amount = %amount,
            balance_after = %entry.balance_after,
            "Wallet credited"
        );
        Ok(entry)
    }

    async fn debit(&self, tenant: &TenantId, debit: LedgerDebit) -> Result<LedgerEntry> {
        let amount = ensure_positive(debit.amount)?;
        let book = self.book(tenant)?;
        let mut book = book.lock().await;

        if !book.wallet.active {
            return Err(Error::WalletInactive {
                tenant: tenant.clone(),
            });
        }
        if !book.wallet.can_afford(amount) {
            tracing::debug!(
                tenant = %tenant,
                required = %amount,
                available = %book.wallet.balance,
                "Debit rejected for insufficient balance"
            );
            return Err(Error::InsufficientBalance {
                required: amount,
                available: book.wallet.balance,
            });
        }

        let now = Utc::now();
        let mut next = book.wallet.clone();
        let (balance_before, balance_after) = next.apply(-amount, now)?;
        let wallet = &book.wallet;
        let entry = self.seal_new_entry(debit.idempotency_key.as_ref(), |sequence| {
            LedgerEntry {
                id: EntryId::new(),
                sequence,
                wallet_id: wallet.id,
                tenant_id: tenant.clone(),
                kind: debit.kind,
                amount: -amount,
                balance_before,
                balance_after,
                currency: wallet.currency.clone(),
                description: debit.description.clone(),
                reference: debit.reference.clone(),
                metadata: debit.metadata.clone(),
                status: EntryStatus::Completed,
                idempotency_key: debit.idempotency_key.clone(),
                created_at: now,
                completed_at: Some(now),
            }
        })?;

        book.wallet = next;
        debug_assert_eq!(book.wallet.balance, entry.balance_after);
        book.entries.push(entry.clone());
        self.index(&entry);

        tracing::info!(
            tenant = %tenant,
            entry_id = %entry.id,
            amount = %amount,
            balance_after = %entry.balance_after,
            "Wallet debited"
        );
        Ok(entry)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.idempotency.get(key).map(|e| e.value().clone()))
    }

    async fn can_afford(&self, tenant: &TenantId, amount: Decimal) -> Result<Affordability> {
        let book = self.book(tenant)?;
        let book = book.lock().await;
        Ok(Affordability {
            balance: book.wallet.balance,
            required: amount,
            active: book.wallet.active,
        })
    }

    async fn open_pending(&self, tenant: &TenantId, credit: LedgerCredit) -> Result<LedgerEntry> {
        let amount = ensure_positive(credit.amount)?;
        let book = self.book(tenant)?;
        let mut book = book.lock().await;

        let wallet = &book.wallet;
        let balance_before = wallet.balance;
        let balance_after = checked_sum(balance_before, amount)?;
        let entry = self.seal_new_entry(credit.idempotency_key.as_ref(), |sequence| {
            LedgerEntry {
                id: EntryId::new(),
                sequence,
                wallet_id: wallet.id,
                tenant_id: tenant.clone(),
                kind: credit.kind,
                amount,
                balance_before,
                balance_after,
                currency: wallet.currency.clone(),
                description: credit.description.clone(),
                reference: credit.reference.clone(),
                metadata: credit.metadata.clone(),
                status: EntryStatus::Pending,
                idempotency_key: credit.idempotency_key.clone(),
                created_at: Utc::now(),
                completed_at: None,
            }
        })?;

        book.entries.push(entry.clone());
        self.index(&entry);
        tracing::debug!(tenant = %tenant, entry_id = %entry.id, amount = %amount, "Pending credit opened");
        Ok(entry)
    }

    async fn transition(&self, id: &EntryId, status: EntryStatus) -> Result<LedgerEntry> {
        let tenant = self
            .entry_index
            .get(id)
            .map(|t| t.value().clone())
            .ok_or(Error::EntryNotFound { id: *id })?;
        let book = self.book(&tenant)?;
        let mut book = book.lock().await;
        let pos = book.position(id).ok_or(Error::EntryNotFound { id: *id })?;

        let current = book.entries[pos].status;
        if current.is_sealed() {
            return Err(Error::immutable("ledger_entry", id));
        }
        if current != EntryStatus::Pending || status == EntryStatus::Pending {
            return Err(Error::InvalidTransition {
                id: *id,
                from: current,
                to: status,
            });
        }

        let now = Utc::now();
        if status == EntryStatus::Completed {
            let amount = book.entries[pos].amount;
            if !book.wallet.can_afford(-amount) {
                return Err(Error::InsufficientBalance {
                    required: -amount,
                    available: book.wallet.balance,
                });
            }
            let (before, after) = book.wallet.apply(amount, now)?;
            let entry = &mut book.entries[pos];
            entry.balance_before = before;
            entry.balance_after = after;
            entry.completed_at = Some(now);
        }
        book.entries[pos].status = status;

        let entry = book.entries[pos].clone();
        if let Some(key) = &entry.idempotency_key {
            self.idempotency.insert(key.clone(), entry.clone());
        }
        tracing::info!(entry_id = %id, status = %status, "Pending entry settled");
        Ok(entry)
    }

    async fn entry(&self, id: &EntryId) -> Result<Option<LedgerEntry>> {
        let Some(tenant) = self.entry_index.get(id).map(|t| t.value().clone()) else {
            return Ok(None);
        };
        let book = self.book(&tenant)?;
        let book = book.lock().await;
        Ok(book.position(id).map(|pos| book.entries[pos].clone()))
    }

    async fn entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>> {
        let books: Vec<Arc<Mutex<WalletBook>>> = match &query.tenant {
            Some(tenant) => self.books.get(tenant).map(|b| Arc::clone(&b)).into_iter().collect(),
            None => self.books.iter().map(|b| Arc::clone(b.value())).collect(),
        };

        let mut matched = Vec::new();
        for book in books {
            let book = book.lock().await;
            matched.extend(book.entries.iter().filter(|e| query.matches(e)).cloned());
        }
        matched.sort_by_key(|e| e.sequence);
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
