//! Constructors for guard decisions.

use chrono::Utc;
use serde_json::{Value, json};

use super::decision::{DecisionEvent, GuardDecision, GuardLayer};
use crate::cost_limit::CostCheck;
use crate::guard::{GuardRequest, GuardResponse};
use crate::ledger::LedgerEntry;
use crate::types::DecisionId;

fn base(request: &GuardRequest, layer: GuardLayer, event: DecisionEvent) -> GuardDecision {
    GuardDecision {
        id: DecisionId::new(),
        sequence: 0,
        tenant_id: request.tenant_id.clone(),
        layer,
        event,
        action: Some(request.action.clone()),
        reference: request.reference.clone(),
        idempotency_key: request.idempotency_key.clone(),
        blocked: false,
        reason: None,
        estimated_cost: request.estimated_cost,
        actual_cost: None,
        balance_before: None,
        balance_after: None,
        metadata: Value::Object(Default::default()),
        context: request.context.clone(),
        created_at: Utc::now(),
    }
}

pub fn passed(request: &GuardRequest, layer: GuardLayer) -> GuardDecision {
    base(request, layer, DecisionEvent::Passed)
}

pub fn passed_cost_limit(request: &GuardRequest, check: &CostCheck) -> GuardDecision {
    let mut decision = passed(request, GuardLayer::CostLimit);
    decision.reason = check.reason.clone();
    decision.metadata = json!({
        "alert": check.alert,
        "daily_total": check.daily_total.to_string(),
        "monthly_total": check.monthly_total.to_string(),
    });
    decision
}

pub fn blocked(request: &GuardRequest, response: &GuardResponse) -> GuardDecision {
    let layer = response.blocked_at_layer.unwrap_or(GuardLayer::Deduction);
    let mut decision = base(request, layer, DecisionEvent::Blocked);
    decision.blocked = true;
    decision.reason = response.reason.clone();
    decision.metadata = json!({ "block": response.block });
    decision
}

pub fn replayed(request: &GuardRequest, original: &GuardResponse) -> GuardDecision {
    let mut decision = base(request, GuardLayer::AntiDouble, DecisionEvent::Replayed);
    decision.actual_cost = original.actual_cost;
    decision.balance_before = original.balance_before;
    decision.balance_after = original.balance_after;
    decision.metadata = json!({ "entry_id": original.entry_id });
    decision
}

pub fn deducted(
    request: &GuardRequest,
    entry: &LedgerEntry,
    cost: Option<&CostCheck>,
) -> GuardDecision {
    let mut decision = base(request, GuardLayer::Deduction, DecisionEvent::Deducted);
    decision.actual_cost = Some(entry.magnitude());
    decision.balance_before = Some(entry.balance_before);
    decision.balance_after = Some(entry.balance_after);
    decision.metadata = json!({
        "entry_id": entry.id,
        "daily_total": cost.map(|c| c.daily_total.to_string()),
        "monthly_total": cost.map(|c| c.monthly_total.to_string()),
    });
    decision
}

/// Rebuilds the response a successful deduction produced.
pub fn response_from_deduction(decision: &GuardDecision) -> Option<GuardResponse> {
    if !decision.is_successful_deduction() {
        return None;
    }
    let entry_id = decision
        .metadata
        .get("entry_id")
        .and_then(|v| serde_json::from_value(v.clone()).ok())?;
    Some(GuardResponse::allowed(
        decision.actual_cost?,
        decision.balance_before?,
        decision.balance_after?,
        entry_id,
    ))
}
