//! Multi-tenant cost limit enforcement.

use std::sync::RwLock;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::limit::{BlockCause, CostCheck, CostLimit, CostLimitPolicy, CostReservation, month_start};
use crate::config::GuardSettings;
use crate::ledger::{EntryKind, EntryStatus, LedgerEntry};
use crate::types::TenantId;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Defaults {
    policy: CostLimitPolicy,
    offset: FixedOffset,
}

/// Per-tenant spend counters. Each tenant's record is mutated under its
/// map shard lock, so concurrent `add_cost` calls for one tenant serialise.
#[derive(Debug)]
pub struct CostLimitEnforcer {
    limits: DashMap<TenantId, CostLimit>,
    defaults: RwLock<Defaults>,
}

impl Default for CostLimitEnforcer {
    fn default() -> Self {
        Self::new(CostLimitPolicy::default(), Utc.fix())
    }
}

impl CostLimitEnforcer {
    pub fn new(default_policy: CostLimitPolicy, billing_offset: FixedOffset) -> Self {
        Self {
            limits: DashMap::new(),
            defaults: RwLock::new(Defaults {
                policy: default_policy,
                offset: billing_offset,
            }),
        }
    }

    pub fn from_settings(settings: &GuardSettings) -> Self {
        Self::new(settings.default_policy(), settings.billing_offset())
    }

    /// Replaces the defaults used for tenants created from now on.
    pub fn apply_settings(&self, settings: &GuardSettings) {
        let mut defaults = self.defaults.write().unwrap_or_else(|e| e.into_inner());
        defaults.policy = settings.default_policy();
        defaults.offset = settings.billing_offset();
    }

    fn defaults(&self) -> Defaults {
        self.defaults
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Billing calendar day for `now`.
    pub fn billing_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.defaults().offset).date_naive()
    }

    pub fn add_cost(&self, tenant: &TenantId, cost: Decimal) -> Result<CostCheck> {
        self.add_cost_at(tenant, cost, Utc::now())
    }

    pub fn add_cost_at(
        &self,
        tenant: &TenantId,
        cost: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CostCheck> {
        if cost.is_sign_negative() {
            return Err(Error::InvalidAmount { amount: cost });
        }
        let defaults = self.defaults();
        let today = now.with_timezone(&defaults.offset).date_naive();

        let mut limit = self
            .limits
            .entry(tenant.clone())
            .or_insert_with(|| CostLimit::new(tenant.clone(), &defaults.policy, today));
        let check = limit.evaluate(cost, today, now)?;
        drop(limit);

        if check.blocked {
            tracing::warn!(
                tenant = %tenant,
                cost = %cost,
                reason = check.reason.as_deref().unwrap_or_default(),
                "Cost limit blocked spend"
            );
        } else if check.alert {
            tracing::info!(
                tenant = %tenant,
                daily_total = %check.daily_total,
                monthly_total = %check.monthly_total,
                "Cost limit alert raised"
            );
        }
        Ok(check)
    }

    /// Returns reserved spend after a later pipeline layer refused the action.
    pub fn release(&self, reservation: &CostReservation) {
        if let Some(mut limit) = self.limits.get_mut(&reservation.tenant_id) {
            limit.release(reservation);
            tracing::debug!(
                tenant = %reservation.tenant_id,
                amount = %reservation.amount,
                "Released cost reservation"
            );
        }
    }

    pub fn configure(&self, tenant: &TenantId, policy: CostLimitPolicy) -> CostLimit {
        let today = self.billing_day(Utc::now());
        let mut limit = self
            .limits
            .entry(tenant.clone())
            .or_insert_with(|| CostLimit::new(tenant.clone(), &policy, today));
        limit.apply_policy(&policy);
        tracing::info!(
            tenant = %tenant,
            daily_limit = ?policy.daily_limit,
            monthly_limit = ?policy.monthly_limit,
            action = ?policy.action_on_limit,
            "Cost limit configured"
        );
        limit.clone()
    }

    pub fn limit(&self, tenant: &TenantId) -> Option<CostLimit> {
        self.limits.get(tenant).map(|l| l.clone())
    }

    /// Blocks all spend for the tenant until [`unblock`](Self::unblock).
    pub fn block(&self, tenant: &TenantId, reason: impl Into<String>) -> CostLimit {
        let defaults = self.defaults();
        let now = Utc::now();
        let today = now.with_timezone(&defaults.offset).date_naive();
        let reason = reason.into();
        let mut limit = self
            .limits
            .entry(tenant.clone())
            .or_insert_with(|| CostLimit::new(tenant.clone(), &defaults.policy, today));
        limit.block(BlockCause::Manual, reason.clone(), now);
        tracing::warn!(tenant = %tenant, reason = %reason, "Tenant spend blocked manually");
        limit.clone()
    }

    pub fn unblock(&self, tenant: &TenantId) -> Option<CostLimit> {
        let mut limit = self.limits.get_mut(tenant)?;
        limit.unblock();
        tracing::info!(tenant = %tenant, "Tenant spend unblocked");
        Some(limit.clone())
    }

    /// Recomputes the current daily and monthly totals from completed usage
    /// entries, repairing drift between reserved spend and actual debits.
    pub fn reconcile_from_ledger(
        &self,
        tenant: &TenantId,
        entries: &[LedgerEntry],
        now: DateTime<Utc>,
    ) -> CostLimit {
        let defaults = self.defaults();
        let today = now.with_timezone(&defaults.offset).date_naive();
        let month = month_start(today);

        let (mut daily, mut monthly) = (Decimal::ZERO, Decimal::ZERO);
        for entry in entries.iter().filter(|e| {
            &e.tenant_id == tenant
                && e.kind == EntryKind::Usage
                && e.status == EntryStatus::Completed
        }) {
            let day = entry.created_at.with_timezone(&defaults.offset).date_naive();
            if month_start(day) == month {
                monthly = monthly.saturating_add(entry.magnitude());
                if day == today {
                    daily = daily.saturating_add(entry.magnitude());
                }
            }
        }

        let mut limit = self
            .limits
            .entry(tenant.clone())
            .or_insert_with(|| CostLimit::new(tenant.clone(), &defaults.policy, today));
        limit.rollover(today);
        if limit.current_daily_cost != daily || limit.current_monthly_cost != monthly {
            tracing::info!(
                tenant = %tenant,
                daily_before = %limit.current_daily_cost,
                daily_after = %daily,
                monthly_before = %limit.current_monthly_cost,
                monthly_after = %monthly,
                "Cost totals reconciled from ledger"
            );
        }
        limit.current_daily_cost = daily;
        limit.current_monthly_cost = monthly;
        limit.updated_at = now;
        limit.clone()
    }

    pub fn tenant_count(&self) -> usize {
        self.limits.len()
    }
}
