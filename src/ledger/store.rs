//! Ledger store trait and read-side query types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entry::{EntryKind, EntryStatus, LedgerCredit, LedgerDebit, LedgerEntry};
use super::wallet::Wallet;
use crate::Result;
use crate::types::{EntryId, TenantId};

/// Wallet balance and the append-only entries that explain it.
///
/// Implementations serialise "read balance → compute → write balance" per
/// wallet and enforce global uniqueness of idempotency keys. A failed debit
/// leaves both the wallet and the ledger untouched.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    fn name(&self) -> &str;

    /// Creates the tenant's wallet, or returns the existing one.
    async fn open_wallet(&self, tenant: &TenantId, currency: &str) -> Result<Wallet>;

    async fn wallet(&self, tenant: &TenantId) -> Result<Option<Wallet>>;

    async fn set_wallet_active(&self, tenant: &TenantId, active: bool) -> Result<Wallet>;

    /// Increases the balance and writes a completed entry.
    async fn credit(&self, tenant: &TenantId, credit: LedgerCredit) -> Result<LedgerEntry>;

    /// Decreases the balance and writes a completed entry.
    ///
    /// Fails with `InsufficientBalance` without side effects, and with
    /// `DuplicateRequest` when the idempotency key was already used.
    async fn debit(&self, tenant: &TenantId, debit: LedgerDebit) -> Result<LedgerEntry>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerEntry>>;

    async fn can_afford(&self, tenant: &TenantId, amount: Decimal) -> Result<Affordability>;

    /// Records a credit awaiting settlement; the balance is untouched until
    /// the entry transitions to completed.
    async fn open_pending(&self, tenant: &TenantId, credit: LedgerCredit) -> Result<LedgerEntry>;

    /// Moves a pending entry to its final status.
    ///
    /// Sealed entries fail with `LedgerImmutableViolation`.
    async fn transition(&self, id: &EntryId, status: EntryStatus) -> Result<LedgerEntry>;

    async fn entry(&self, id: &EntryId) -> Result<Option<LedgerEntry>>;

    async fn entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>>;

    /// Compares the wallet balance with the sum of its completed entries.
    async fn reconcile(&self, tenant: &TenantId) -> Result<Reconciliation> {
        let wallet = self
            .wallet(tenant)
            .await?
            .ok_or_else(|| crate::Error::WalletNotFound {
                tenant: tenant.clone(),
            })?;
        let entries = self
            .entries(
                &LedgerQuery::for_tenant(tenant.clone()).status(EntryStatus::Completed),
            )
            .await?;

        Ok(Reconciliation {
            tenant: tenant.clone(),
            wallet_balance: wallet.balance,
            ledger_sum: entries.iter().map(|e| e.amount).sum(),
            completed_entries: entries.len(),
        })
    }
}

/// Saldo snapshot used by the balance layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Affordability {
    pub balance: Decimal,
    pub required: Decimal,
    pub active: bool,
}

impl Affordability {
    pub fn sufficient(&self) -> bool {
        self.active && self.balance >= self.required
    }

    pub fn shortfall(&self) -> Decimal {
        (self.required - self.balance).max(Decimal::ZERO)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub tenant: TenantId,
    pub wallet_balance: Decimal,
    pub ledger_sum: Decimal,
    pub completed_entries: usize,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.wallet_balance == self.ledger_sum
    }

    pub fn drift(&self) -> Decimal {
        self.wallet_balance - self.ledger_sum
    }
}

/// Filter for the reporting surface. Results are ordered by sequence.
#[derive(Clone, Debug, Default)]
pub struct LedgerQuery {
    pub tenant: Option<TenantId>,
    pub kind: Option<EntryKind>,
    pub status: Option<EntryStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.tenant.as_ref().is_none_or(|t| &entry.tenant_id == t)
            && self.kind.is_none_or(|k| entry.kind == k)
            && self.status.is_none_or(|s| entry.status == s)
            && self.since.is_none_or(|s| entry.created_at >= s)
            && self.until.is_none_or(|u| entry.created_at < u)
    }
}
