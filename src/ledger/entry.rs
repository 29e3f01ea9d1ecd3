//! Ledger lines and the drafts used to request them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EntryId, Reference, TenantId, WalletId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Topup,
    Usage,
    Adjustment,
    Refund,
    Bonus,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Topup => "topup",
            EntryKind::Usage => "usage",
            EntryKind::Adjustment => "adjustment",
            EntryKind::Refund => "refund",
            EntryKind::Bonus => "bonus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topup" => Some(EntryKind::Topup),
            "usage" => Some(EntryKind::Usage),
            "adjustment" => Some(EntryKind::Adjustment),
            "refund" => Some(EntryKind::Refund),
            "bonus" => Some(EntryKind::Bonus),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl EntryStatus {
    /// Completed and failed entries can never change again.
    pub fn is_sealed(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
            EntryStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EntryStatus::Pending),
            "completed" => Some(EntryStatus::Completed),
            "failed" => Some(EntryStatus::Failed),
            "cancelled" => Some(EntryStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable ledger line.
///
/// `amount` is signed: credits are positive, debits negative. For completed
/// entries `balance_after == balance_before + amount` and equals the wallet
/// balance at completion time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub sequence: u64,
    pub wallet_id: WalletId,
    pub tenant_id: TenantId,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub currency: String,
    pub description: String,
    pub reference: Option<Reference>,
    #[serde(default)]
    pub metadata: Value,
    pub status: EntryStatus,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn is_sealed(&self) -> bool {
        self.status.is_sealed()
    }

    pub fn is_completed(&self) -> bool {
        self.status == EntryStatus::Completed
    }

    pub fn is_credit(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Absolute value of the signed amount.
    pub fn magnitude(&self) -> Decimal {
        self.amount.abs()
    }

    pub fn is_consistent(&self) -> bool {
        self.balance_after == self.balance_before + self.amount
    }
}

/// Request for a balance increase.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerCredit {
    pub amount: Decimal,
    pub kind: EntryKind,
    pub description: String,
    pub reference: Option<Reference>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
}

impl LedgerCredit {
    pub fn new(amount: Decimal, kind: EntryKind) -> Self {
        Self {
            amount,
            kind,
            description: String::new(),
            reference: None,
            idempotency_key: None,
            metadata: Value::Null,
        }
    }

    pub fn topup(amount: Decimal) -> Self {
        Self::new(amount, EntryKind::Topup).description("Wallet top-up")
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Request for a balance decrease.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerDebit {
    pub amount: Decimal,
    pub kind: EntryKind,
    pub description: String,
    pub reference: Option<Reference>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
}

impl LedgerDebit {
    pub fn new(amount: Decimal, kind: EntryKind) -> Self {
        Self {
            amount,
            kind,
            description: String::new(),
            reference: None,
            idempotency_key: None,
            metadata: Value::Null,
        }
    }

    pub fn usage(amount: Decimal) -> Self {
        Self::new(amount, EntryKind::Usage)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn maybe_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_sealing() {
        assert!(!EntryStatus::Pending.is_sealed());
        assert!(EntryStatus::Completed.is_sealed());
        assert!(EntryStatus::Failed.is_sealed());
        assert!(!EntryStatus::Cancelled.is_sealed());
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in [
            EntryKind::Topup,
            EntryKind::Usage,
            EntryKind::Adjustment,
            EntryKind::Refund,
            EntryKind::Bonus,
        ] {
            assert_eq!(EntryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryKind::parse("withdrawal"), None);
    }

    #[test]
    fn test_debit_builder() {
        let debit = LedgerDebit::usage(dec!(350))
            .description("Broadcast campaign")
            .reference(Reference::Campaign(9))
            .idempotency_key("camp-9");
        assert_eq!(debit.kind, EntryKind::Usage);
        assert_eq!(debit.idempotency_key.as_deref(), Some("camp-9"));
        assert_eq!(debit.reference, Some(Reference::Campaign(9)));
    }
}
