//! # revenue-guard
//!
//! Wallet ledger and revenue guard pipeline for multi-tenant messaging billing.
//!
//! Every billable action (sending a message, launching a campaign) passes an
//! ordered admission pipeline before an atomic, audited wallet debit:
//!
//! 1. subscription validity
//! 2. plan quota
//! 3. idempotency replay (anti double charge)
//! 4. daily/monthly cost limits
//! 5. balance sufficiency
//! 6. atomic deduction
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use revenue_guard::guard::{
//!     GuardRequest, NoopNotifier, RevenueGuard, StaticPlanLimits, StaticSubscriptions,
//! };
//! use revenue_guard::ledger::{LedgerCredit, LedgerStore, MemoryLedgerStore};
//! use revenue_guard::types::TenantId;
//! use rust_decimal_macros::dec;
//!
//! # async fn example() -> Result<(), revenue_guard::Error> {
//! let ledger = Arc::new(MemoryLedgerStore::new());
//! let tenant = TenantId::new("klien-42");
//! ledger.open_wallet(&tenant, "IDR").await?;
//! ledger.credit(&tenant, LedgerCredit::topup(dec!(10000))).await?;
//!
//! let guard = RevenueGuard::builder()
//!     .ledger(ledger)
//!     .subscriptions(Arc::new(StaticSubscriptions::allow_all()))
//!     .plan_limits(Arc::new(StaticPlanLimits::allow_all()))
//!     .notifier(Arc::new(NoopNotifier))
//!     .build()?;
//!
//! let response = guard
//!     .evaluate(GuardRequest::new(tenant, "send_message", dec!(3000)).idempotency_key("k1"))
//!     .await?;
//! assert!(response.allowed);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod audit;
pub mod config;
pub mod cost_limit;
pub mod credit;
pub mod guard;
pub mod ledger;
pub mod observability;
#[cfg(feature = "postgres")]
pub mod persistence;
pub mod types;

pub use audit::{AuditLog, DecisionEvent, DecisionFilter, GuardDecision, GuardLayer, MemoryAuditLog};
pub use config::{ConfigBuilder, ConfigError, ConfigProvider, GuardSettings};
pub use cost_limit::{
    ActionOnLimit, CostCheck, CostLimit, CostLimitEnforcer, CostLimitPolicy, LimitPeriod,
};
pub use credit::{CreditEntry, CreditLedger, CreditSource, MemoryCreditStore, SourceResolver};
pub use guard::{
    BlockReason, GuardRequest, GuardResponse, NotificationDispatcher, PlanLimitChecker,
    RevenueGuard, SubscriptionChecker,
};
pub use ledger::{
    EntryKind, EntryStatus, LedgerCredit, LedgerDebit, LedgerEntry, LedgerQuery, LedgerStore,
    MemoryLedgerStore, Wallet,
};
pub use types::{CreditId, DecisionId, EntryId, Reference, RequestContext, TenantId, WalletId};

use rust_decimal::Decimal;

/// Error type for ledger and guard operations.
///
/// Business rejections carry enough context to be surfaced to the tenant
/// verbatim; storage and configuration failures carry the backend message.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Amount was zero or negative where a positive amount is required.
    #[error("Invalid amount: {amount} (must be greater than zero)")]
    InvalidAmount { amount: Decimal },

    /// Wallet balance cannot cover the requested debit.
    #[error("Insufficient balance: {required} required, {available} available")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    /// Tenant has no active subscription.
    #[error("No active subscription for tenant {tenant}")]
    NoActiveSubscription { tenant: TenantId },

    /// Action is outside the tenant's plan quota.
    #[error("Plan limit exceeded for tenant {tenant}: {action}")]
    PlanLimitExceeded { tenant: TenantId, action: String },

    /// Daily or monthly cost limit reached, or spend blocked manually.
    #[error("Cost limit exceeded: {reason}")]
    CostLimitExceeded {
        period: Option<LimitPeriod>,
        reason: String,
    },

    /// Idempotency key has already been applied; carries the original entry.
    #[error("Duplicate request for idempotency key {key}")]
    DuplicateRequest {
        key: String,
        original: Box<LedgerEntry>,
    },

    /// Idempotency key reused with different tenant or amount.
    #[error("Idempotency key {key} reused with different parameters")]
    IdempotencyConflict { key: String },

    /// Credit source is not in a creditable state or was already credited.
    #[error("Invalid source state for {source_ref}: {state}")]
    InvalidSourceState { source_ref: String, state: String },

    /// Attempted mutation of a sealed ledger entry or audit decision.
    #[error("Ledger immutability violated: {record} {id} is sealed")]
    LedgerImmutableViolation { record: &'static str, id: String },

    /// Tenant has no wallet.
    #[error("Wallet not found for tenant {tenant}")]
    WalletNotFound { tenant: TenantId },

    /// Wallet exists but is suspended.
    #[error("Wallet for tenant {tenant} is inactive")]
    WalletInactive { tenant: TenantId },

    /// Ledger entry does not exist.
    #[error("Ledger entry not found: {id}")]
    EntryNotFound { id: EntryId },

    /// Pending entry cannot move to the requested status.
    #[error("Invalid status transition for entry {id}: {from} -> {to}")]
    InvalidTransition {
        id: EntryId,
        from: EntryStatus,
        to: EntryStatus,
    },

    /// Operation currency differs from the wallet currency.
    #[error("Currency mismatch: wallet is {wallet}, operation is {operation}")]
    CurrencyMismatch { wallet: String, operation: String },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence backend failed.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Business rule rejected the operation; safe to show to the tenant.
    Rejected,
    /// Request was already applied; resolves to the original outcome.
    Replay,
    /// Internal invariant breach; must never be swallowed.
    Contract,
    /// Configuration or setup errors
    Configuration,
    /// Persistence failures that may succeed on retry
    Storage,
}

impl Error {
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
        }
    }

    pub fn immutable(record: &'static str, id: impl ToString) -> Self {
        let id = id.to_string();
        tracing::error!(record, id = %id, "Attempted mutation of sealed ledger record");
        Error::LedgerImmutableViolation { record, id }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidAmount { .. }
            | Error::InsufficientBalance { .. }
            | Error::NoActiveSubscription { .. }
            | Error::PlanLimitExceeded { .. }
            | Error::CostLimitExceeded { .. }
            | Error::IdempotencyConflict { .. }
            | Error::InvalidSourceState { .. }
            | Error::WalletNotFound { .. }
            | Error::WalletInactive { .. }
            | Error::CurrencyMismatch { .. } => ErrorCategory::Rejected,

            Error::DuplicateRequest { .. } => ErrorCategory::Replay,

            Error::LedgerImmutableViolation { .. }
            | Error::EntryNotFound { .. }
            | Error::InvalidTransition { .. } => ErrorCategory::Contract,

            Error::Config(_) => ErrorCategory::Configuration,

            Error::Storage { .. } | Error::Json(_) => ErrorCategory::Storage,
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.category() == ErrorCategory::Rejected
    }

    pub fn is_contract_violation(&self) -> bool {
        self.category() == ErrorCategory::Contract
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Storage
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias for ledger and guard operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_display() {
        let err = Error::InsufficientBalance {
            required: dec!(8000),
            available: dec!(7000),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance: 8000 required, 7000 available"
        );
    }

    #[test]
    fn test_error_categories() {
        assert!(Error::InvalidAmount { amount: dec!(0) }.is_rejection());
        assert!(
            Error::LedgerImmutableViolation {
                record: "ledger_entry",
                id: "x".into()
            }
            .is_contract_violation()
        );
        assert!(Error::storage("connection reset").is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_cost_limit_error_mentions_period() {
        let err = Error::CostLimitExceeded {
            period: Some(LimitPeriod::Daily),
            reason: "daily cost limit reached".into(),
        };
        assert!(err.to_string().contains("daily cost limit reached"));
    }
}
