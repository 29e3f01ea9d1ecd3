//! Guard decision records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{DecisionId, Reference, RequestContext, TenantId};

/// Pipeline layers, in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardLayer {
    Subscription,
    PlanLimit,
    AntiDouble,
    CostLimit,
    Saldo,
    Deduction,
}

impl GuardLayer {
    pub const COUNT: usize = 6;

    pub const ALL: [GuardLayer; Self::COUNT] = [
        GuardLayer::Subscription,
        GuardLayer::PlanLimit,
        GuardLayer::AntiDouble,
        GuardLayer::CostLimit,
        GuardLayer::Saldo,
        GuardLayer::Deduction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GuardLayer::Subscription => "subscription",
            GuardLayer::PlanLimit => "plan_limit",
            GuardLayer::AntiDouble => "anti_double",
            GuardLayer::CostLimit => "cost_limit",
            GuardLayer::Saldo => "saldo",
            GuardLayer::Deduction => "deduction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == s)
    }

    /// Zero-based position in the pipeline.
    pub fn ordinal(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for GuardLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionEvent {
    Passed,
    Blocked,
    /// A prior successful deduction answered the request.
    Replayed,
    Deducted,
}

impl DecisionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionEvent::Passed => "passed",
            DecisionEvent::Blocked => "blocked",
            DecisionEvent::Replayed => "replayed",
            DecisionEvent::Deducted => "deducted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "passed" => Some(DecisionEvent::Passed),
            "blocked" => Some(DecisionEvent::Blocked),
            "replayed" => Some(DecisionEvent::Replayed),
            "deducted" => Some(DecisionEvent::Deducted),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecisionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One layer outcome. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardDecision {
    pub id: DecisionId,
    /// Assigned by the audit log on record; zero until then.
    pub sequence: u64,
    pub tenant_id: TenantId,
    pub layer: GuardLayer,
    pub event: DecisionEvent,
    pub action: Option<String>,
    pub reference: Option<Reference>,
    pub idempotency_key: Option<String>,
    pub blocked: bool,
    pub reason: Option<String>,
    pub estimated_cost: Decimal,
    pub actual_cost: Option<Decimal>,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub metadata: Value,
    pub context: RequestContext,
    pub created_at: DateTime<Utc>,
}

impl GuardDecision {
    pub fn is_successful_deduction(&self) -> bool {
        self.event == DecisionEvent::Deducted && !self.blocked
    }
}

/// Query over recorded decisions. Results are ordered by sequence.
#[derive(Clone, Debug, Default)]
pub struct DecisionFilter {
    pub tenant: Option<TenantId>,
    pub layer: Option<GuardLayer>,
    pub event: Option<DecisionEvent>,
    pub blocked: Option<bool>,
    pub idempotency_key: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl DecisionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn layer(mut self, layer: GuardLayer) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn event(mut self, event: DecisionEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn blocked(mut self, blocked: bool) -> Self {
        self.blocked = Some(blocked);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
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

    pub fn matches(&self, decision: &GuardDecision) -> bool {
        self.tenant.as_ref().is_none_or(|t| &decision.tenant_id == t)
            && self.layer.is_none_or(|l| decision.layer == l)
            && self.event.is_none_or(|e| decision.event == e)
            && self.blocked.is_none_or(|b| decision.blocked == b)
            && self
                .idempotency_key
                .as_ref()
                .is_none_or(|k| decision.idempotency_key.as_ref() == Some(k))
            && self.since.is_none_or(|s| decision.created_at >= s)
            && self.until.is_none_or(|u| decision.created_at < u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_order_and_names() {
        assert!(GuardLayer::Subscription < GuardLayer::Deduction);
        for (i, layer) in GuardLayer::ALL.iter().enumerate() {
            assert_eq!(layer.ordinal(), i);
            assert_eq!(GuardLayer::parse(layer.as_str()), Some(*layer));
        }
        assert_eq!(
            serde_json::to_string(&GuardLayer::PlanLimit).unwrap(),
            "\"plan_limit\""
        );
    }

    #[test]
    fn test_event_parse() {
        assert_eq!(DecisionEvent::parse("replayed"), Some(DecisionEvent::Replayed));
        assert_eq!(DecisionEvent::parse("updated"), None);
    }
}
