//! Guard request and response types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::GuardLayer;
use crate::cost_limit::LimitPeriod;
use crate::types::{EntryId, Reference, RequestContext, TenantId};
use crate::{Error, Result};

/// A billable action awaiting admission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardRequest {
    pub tenant_id: TenantId,
    pub action: String,
    pub estimated_cost: Decimal,
    pub idempotency_key: Option<String>,
    pub reference: Option<Reference>,
    pub context: RequestContext,
}

impl GuardRequest {
    pub fn new(tenant_id: TenantId, action: impl Into<String>, estimated_cost: Decimal) -> Self {
        Self {
            tenant_id,
            action: action.into(),
            estimated_cost,
            idempotency_key: None,
            reference: None,
            context: RequestContext::default(),
        }
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Why a request was refused.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum BlockReason {
    NoActiveSubscription,
    PlanLimitExceeded,
    IdempotencyConflict {
        key: String,
    },
    CostLimitExceeded {
        period: Option<LimitPeriod>,
    },
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },
    WalletNotFound,
    WalletInactive,
}

impl BlockReason {
    pub fn layer(&self) -> GuardLayer {
        match self {
            BlockReason::NoActiveSubscription => GuardLayer::Subscription,
            BlockReason::PlanLimitExceeded => GuardLayer::PlanLimit,
            BlockReason::IdempotencyConflict { .. } => GuardLayer::AntiDouble,
            BlockReason::CostLimitExceeded { .. } => GuardLayer::CostLimit,
            BlockReason::InsufficientBalance { .. }
            | BlockReason::WalletNotFound
            | BlockReason::WalletInactive => GuardLayer::Saldo,
        }
    }

    /// Maps a business rejection from a lower layer onto a block reason.
    pub(crate) fn from_error(err: &Error) -> Option<Self> {
        match err {
            Error::InsufficientBalance {
                required,
                available,
            } => Some(BlockReason::InsufficientBalance {
                required: *required,
                available: *available,
            }),
            Error::WalletNotFound { .. } => Some(BlockReason::WalletNotFound),
            Error::WalletInactive { .. } => Some(BlockReason::WalletInactive),
            _ => None,
        }
    }
}

/// Outcome of [`RevenueGuard::evaluate`](super::RevenueGuard::evaluate).
///
/// A replayed request receives the original response unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardResponse {
    pub allowed: bool,
    pub blocked_at_layer: Option<GuardLayer>,
    pub reason: Option<String>,
    pub block: Option<BlockReason>,
    pub actual_cost: Option<Decimal>,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub entry_id: Option<EntryId>,
}

impl GuardResponse {
    pub fn allowed(
        actual_cost: Decimal,
        balance_before: Decimal,
        balance_after: Decimal,
        entry_id: EntryId,
    ) -> Self {
        Self {
            allowed: true,
            blocked_at_layer: None,
            reason: None,
            block: None,
            actual_cost: Some(actual_cost),
            balance_before: Some(balance_before),
            balance_after: Some(balance_after),
            entry_id: Some(entry_id),
        }
    }

    pub fn blocked(block: BlockReason, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            blocked_at_layer: Some(block.layer()),
            reason: Some(reason.into()),
            block: Some(block),
            actual_cost: None,
            balance_before: None,
            balance_after: None,
            entry_id: None,
        }
    }

    /// Converts a refusal into the matching typed error.
    pub fn into_result(self, tenant: &TenantId, action: &str) -> Result<Self> {
        let Some(block) = self.block.clone() else {
            return Ok(self);
        };
        let reason = self.reason.unwrap_or_default();
        Err(match block {
            BlockReason::NoActiveSubscription => Error::NoActiveSubscription {
                tenant: tenant.clone(),
            },
            BlockReason::PlanLimitExceeded => Error::PlanLimitExceeded {
                tenant: tenant.clone(),
                action: action.to_string(),
            },
            BlockReason::IdempotencyConflict { key } => Error::IdempotencyConflict { key },
            BlockReason::CostLimitExceeded { period } => Error::CostLimitExceeded { period, reason },
            BlockReason::InsufficientBalance {
                required,
                available,
            } => Error::InsufficientBalance {
                required,
                available,
            },
            BlockReason::WalletNotFound => Error::WalletNotFound {
                tenant: tenant.clone(),
            },
            BlockReason::WalletInactive => Error::WalletInactive {
                tenant: tenant.clone(),
            },
        })
    }
}
