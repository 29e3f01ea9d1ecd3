//! Per-tenant cost limit record and its evaluation rules.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::types::TenantId;
use crate::types::money::{checked_sum, percent_of};

/// What happens when spend would reach a configured limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOnLimit {
    /// Refuse the spend and keep refusing until the period rolls over.
    #[default]
    Block,
    /// Allow the spend and surface a warning to the tenant.
    Warn,
    /// Allow the spend and notify operators.
    Notify,
}

impl ActionOnLimit {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "block" => Some(ActionOnLimit::Block),
            "warn" => Some(ActionOnLimit::Warn),
            "notify" => Some(ActionOnLimit::Notify),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPeriod {
    Daily,
    Monthly,
}

impl std::fmt::Display for LimitPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitPeriod::Daily => write!(f, "daily"),
            LimitPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

/// Why a tenant's spend is blocked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCause {
    Limit(LimitPeriod),
    /// Set by an operator; survives rollover.
    Manual,
}

impl BlockCause {
    pub fn period(&self) -> Option<LimitPeriod> {
        match self {
            BlockCause::Limit(period) => Some(*period),
            BlockCause::Manual => None,
        }
    }
}

/// Configurable part of a cost limit. `None` limits are unlimited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostLimitPolicy {
    pub daily_limit: Option<Decimal>,
    pub monthly_limit: Option<Decimal>,
    pub alert_threshold_percent: Decimal,
    pub action_on_limit: ActionOnLimit,
}

impl Default for CostLimitPolicy {
    fn default() -> Self {
        Self {
            daily_limit: None,
            monthly_limit: None,
            alert_threshold_percent: dec!(80),
            action_on_limit: ActionOnLimit::Block,
        }
    }
}

impl CostLimitPolicy {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn daily(mut self, limit: Decimal) -> Self {
        self.daily_limit = Some(limit);
        self
    }

    pub fn monthly(mut self, limit: Decimal) -> Self {
        self.monthly_limit = Some(limit);
        self
    }

    pub fn threshold(mut self, percent: Decimal) -> Self {
        self.alert_threshold_percent = percent;
        self
    }

    pub fn action(mut self, action: ActionOnLimit) -> Self {
        self.action_on_limit = action;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Spend crossed the alert threshold percentage.
    Threshold,
    /// Spend reached the limit itself.
    LimitReached,
}

/// Notification-worthy event produced by an evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostAlert {
    pub tenant_id: TenantId,
    pub period: LimitPeriod,
    pub kind: AlertKind,
    pub current: Decimal,
    pub limit: Decimal,
    pub percent: Decimal,
    pub blocked: bool,
}

/// Spend accepted by an evaluation; returned through
/// [`CostLimitEnforcer::release`](super::CostLimitEnforcer::release) when a
/// later layer refuses the action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostReservation {
    pub tenant_id: TenantId,
    pub amount: Decimal,
    pub day: NaiveDate,
    pub month: NaiveDate,
    /// One-shot alert flags this spend raised.
    pub armed: AlertFlags,
}

/// The four one-shot alert flags of a [`CostLimit`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFlags {
    pub daily_threshold: bool,
    pub monthly_threshold: bool,
    pub daily_limit: bool,
    pub monthly_limit: bool,
}

impl AlertFlags {
    /// Flags set in `self` but not in `earlier`.
    pub fn raised_since(self, earlier: AlertFlags) -> AlertFlags {
        AlertFlags {
            daily_threshold: self.daily_threshold && !earlier.daily_threshold,
            monthly_threshold: self.monthly_threshold && !earlier.monthly_threshold,
            daily_limit: self.daily_limit && !earlier.daily_limit,
            monthly_limit: self.monthly_limit && !earlier.monthly_limit,
        }
    }
}

/// Outcome of [`CostLimit::evaluate`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostCheck {
    pub can_proceed: bool,
    pub blocked: bool,
    pub alert: bool,
    pub reason: Option<String>,
    pub exceeded: Option<LimitPeriod>,
    pub alerts: Vec<CostAlert>,
    pub daily_total: Decimal,
    pub monthly_total: Decimal,
    pub reservation: Option<CostReservation>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rollover {
    pub daily: bool,
    pub monthly: bool,
}

/// Rolling daily/monthly spend counters for one tenant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostLimit {
    pub tenant_id: TenantId,
    pub daily_limit: Option<Decimal>,
    pub monthly_limit: Option<Decimal>,
    pub current_daily_cost: Decimal,
    pub current_monthly_cost: Decimal,
    pub current_date: NaiveDate,
    /// First day of the month the monthly total belongs to.
    pub current_month: NaiveDate,
    pub alert_threshold_percent: Decimal,
    pub daily_alert_sent: bool,
    pub monthly_alert_sent: bool,
    pub daily_limit_alert_sent: bool,
    pub monthly_limit_alert_sent: bool,
    pub action_on_limit: ActionOnLimit,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub blocked_cause: Option<BlockCause>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

impl CostLimit {
    pub fn new(tenant_id: TenantId, policy: &CostLimitPolicy, today: NaiveDate) -> Self {
        Self {
            tenant_id,
            daily_limit: policy.daily_limit,
            monthly_limit: policy.monthly_limit,
            current_daily_cost: Decimal::ZERO,
            current_monthly_cost: Decimal::ZERO,
            current_date: today,
            current_month: month_start(today),
            alert_threshold_percent: policy.alert_threshold_percent,
            daily_alert_sent: false,
            monthly_alert_sent: false,
            daily_limit_alert_sent: false,
            monthly_limit_alert_sent: false,
            action_on_limit: policy.action_on_limit,
            blocked: false,
            blocked_reason: None,
            blocked_cause: None,
            blocked_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn policy(&self) -> CostLimitPolicy {
        CostLimitPolicy {
            daily_limit: self.daily_limit,
            monthly_limit: self.monthly_limit,
            alert_threshold_percent: self.alert_threshold_percent,
            action_on_limit: self.action_on_limit,
        }
    }

    pub fn apply_policy(&mut self, policy: &CostLimitPolicy) {
        self.daily_limit = policy.daily_limit;
        self.monthly_limit = policy.monthly_limit;
        self.alert_threshold_percent = policy.alert_threshold_percent;
        self.action_on_limit = policy.action_on_limit;
        self.updated_at = Utc::now();
    }

    pub fn limit_for(&self, period: LimitPeriod) -> Option<Decimal> {
        match period {
            LimitPeriod::Daily => self.daily_limit,
            LimitPeriod::Monthly => self.monthly_limit,
        }
    }

    pub fn total_for(&self, period: LimitPeriod) -> Decimal {
        match period {
            LimitPeriod::Daily => self.current_daily_cost,
            LimitPeriod::Monthly => self.current_monthly_cost,
        }
    }

    pub fn block(&mut self, cause: BlockCause, reason: impl Into<String>, now: DateTime<Utc>) {
        self.blocked = true;
        self.blocked_cause = Some(cause);
        self.blocked_reason = Some(reason.into());
        self.blocked_at = Some(now);
        self.updated_at = now;
    }

    pub fn unblock(&mut self) {
        self.blocked = false;
        self.blocked_cause = None;
        self.blocked_reason = None;
        self.blocked_at = None;
        self.updated_at = Utc::now();
    }

    /// Resets counters whose calendar period has elapsed.
    ///
    /// A new day clears the daily total, daily alert flags and a daily-limit
    /// block. A new month additionally clears the monthly total, monthly
    /// alert flags and any limit-induced block. Manual blocks survive.
    pub fn rollover(&mut self, today: NaiveDate) -> Rollover {
        let mut rolled = Rollover::default();

        if today != self.current_date {
            self.current_daily_cost = Decimal::ZERO;
            self.daily_alert_sent = false;
            self.daily_limit_alert_sent = false;
            self.current_date = today;
            if self.blocked_cause == Some(BlockCause::Limit(LimitPeriod::Daily)) {
                self.unblock();
            }
            rolled.daily = true;
        }

        let month = month_start(today);
        if month != self.current_month {
            self.current_monthly_cost = Decimal::ZERO;
            self.monthly_alert_sent = false;
            self.monthly_limit_alert_sent = false;
            self.current_month = month;
            if matches!(self.blocked_cause, Some(BlockCause::Limit(_))) {
                self.unblock();
            }
            rolled.monthly = true;
        }

        rolled
    }

    /// Rolls periods over, applies the limit policy to `cost`, and commits
    /// the spend when it may proceed.
    ///
    /// A cost whose running totals cannot be represented fails with
    /// `InvalidAmount` before any limit state changes.
    pub fn evaluate(
        &mut self,
        cost: Decimal,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<CostCheck> {
        self.rollover(today);

        if self.blocked {
            let reason = self
                .blocked_reason
                .clone()
                .unwrap_or_else(|| "spending is blocked".to_string());
            return Ok(self.refusal(reason, self.blocked_cause.and_then(|c| c.period()), Vec::new()));
        }

        let daily_total = checked_sum(self.current_daily_cost, cost)?;
        let monthly_total = checked_sum(self.current_monthly_cost, cost)?;
        let flags_before = self.alert_flags();

        let mut alerts = Vec::new();
        let mut reason = None;
        let mut exceeded = None;

        for period in [LimitPeriod::Daily, LimitPeriod::Monthly] {
            let Some(limit) = self.limit_for(period) else {
                continue;
            };
            let prospective = match period {
                LimitPeriod::Daily => daily_total,
                LimitPeriod::Monthly => monthly_total,
            };
            if prospective < limit {
                continue;
            }

            let message = format!(
                "{period} cost limit reached: {prospective} of {limit} {}",
                match self.action_on_limit {
                    ActionOnLimit::Block => "(spending blocked)",
                    ActionOnLimit::Warn | ActionOnLimit::Notify => "(limit exceeded)",
                }
            );

            if self.action_on_limit == ActionOnLimit::Block {
                self.block(BlockCause::Limit(period), message.clone(), now);
                let alert = self.alert(period, AlertKind::LimitReached, prospective, limit, true);
                self.mark_limit_alert(period);
                return Ok(self.refusal(message, Some(period), vec![alert]));
            }

            if !self.limit_alert_sent(period) {
                alerts.push(self.alert(period, AlertKind::LimitReached, prospective, limit, false));
                self.mark_limit_alert(period);
            }
            // the limit alert supersedes the threshold alert for this period
            self.mark_threshold_alert(period);
            exceeded.get_or_insert(period);
            reason.get_or_insert(message);
        }

        self.current_daily_cost = daily_total;
        self.current_monthly_cost = monthly_total;
        self.updated_at = now;

        for period in [LimitPeriod::Daily, LimitPeriod::Monthly] {
            let Some(limit) = self.limit_for(period) else {
                continue;
            };
            let total = self.total_for(period);
            if !self.threshold_alert_sent(period)
                && percent_of(total, limit) >= self.alert_threshold_percent
            {
                alerts.push(self.alert(period, AlertKind::Threshold, total, limit, false));
                self.mark_threshold_alert(period);
            }
        }

        Ok(CostCheck {
            can_proceed: true,
            blocked: false,
            alert: exceeded.is_some() || !alerts.is_empty(),
            reason,
            exceeded,
            alerts,
            daily_total: self.current_daily_cost,
            monthly_total: self.current_monthly_cost,
            reservation: Some(CostReservation {
                tenant_id: self.tenant_id.clone(),
                amount: cost,
                day: self.current_date,
                month: self.current_month,
                armed: self.alert_flags().raised_since(flags_before),
            }),
        })
    }

    /// Returns reserved spend, ignoring periods that have since rolled over.
    ///
    /// Alert flags the reservation raised are lowered again, so the next
    /// evaluation that reaches the threshold with committed spend re-raises them.
    pub fn release(&mut self, reservation: &CostReservation) {
        let armed = reservation.armed;
        if reservation.day == self.current_date {
            self.current_daily_cost = (self.current_daily_cost - reservation.amount).max(Decimal::ZERO);
            if armed.daily_threshold {
                self.daily_alert_sent = false;
            }
            if armed.daily_limit {
                self.daily_limit_alert_sent = false;
            }
        }
        if reservation.month == self.current_month {
            self.current_monthly_cost =
                (self.current_monthly_cost - reservation.amount).max(Decimal::ZERO);
            if armed.monthly_threshold {
                self.monthly_alert_sent = false;
            }
            if armed.monthly_limit {
                self.monthly_limit_alert_sent = false;
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn alert_flags(&self) -> AlertFlags {
        AlertFlags {
            daily_threshold: self.daily_alert_sent,
            monthly_threshold: self.monthly_alert_sent,
            daily_limit: self.daily_limit_alert_sent,
            monthly_limit: self.monthly_limit_alert_sent,
        }
    }

    fn refusal(
        &self,
        reason: String,
        period: Option<LimitPeriod>,
        alerts: Vec<CostAlert>,
    ) -> CostCheck {
        CostCheck {
            can_proceed: false,
            blocked: true,
            alert: !alerts.is_empty(),
            reason: Some(reason),
            exceeded: period,
            alerts,
            daily_total: self.current_daily_cost,
            monthly_total: self.current_monthly_cost,
            reservation: None,
        }
    }

    fn alert(
        &self,
        period: LimitPeriod,
        kind: AlertKind,
        current: Decimal,
        limit: Decimal,
        blocked: bool,
    ) -> CostAlert {
        CostAlert {
            tenant_id: self.tenant_id.clone(),
            period,
            kind,
            current,
            limit,
            percent: percent_of(current, limit).round_dp(2),
            blocked,
        }
    }

    fn threshold_alert_sent(&self, period: LimitPeriod) -> bool {
        match period {
            LimitPeriod::Daily => self.daily_alert_sent,
            LimitPeriod::Monthly => self.monthly_alert_sent,
        }
    }

    fn mark_threshold_alert(&mut self, period: LimitPeriod) {
        match period {
            LimitPeriod::Daily => self.daily_alert_sent = true,
            LimitPeriod::Monthly => self.monthly_alert_sent = true,
        }
    }

    fn limit_alert_sent(&self, period: LimitPeriod) -> bool {
        match period {
            LimitPeriod::Daily => self.daily_limit_alert_sent,
            LimitPeriod::Monthly => self.monthly_limit_alert_sent,
        }
    }

    fn mark_limit_alert(&mut self, period: LimitPeriod) {
        match period {
            LimitPeriod::Daily => self.daily_limit_alert_sent = true,
            LimitPeriod::Monthly => self.monthly_limit_alert_sent = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn limit_with(policy: CostLimitPolicy, today: NaiveDate) -> CostLimit {
        CostLimit::new(TenantId::new("klien-9"), &policy, today)
    }

    #[test]
    fn test_block_policy_refuses_and_keeps_totals() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::default().daily(dec!(50000)), today);
        limit.current_daily_cost = dec!(48000);
        limit.current_monthly_cost = dec!(48000);

        let check = limit.evaluate(dec!(3000), today, Utc::now()).unwrap();

        assert!(!check.can_proceed);
        assert!(check.blocked);
        assert_eq!(check.exceeded, Some(LimitPeriod::Daily));
        assert!(check.reason.as_deref().unwrap().contains("daily cost limit"));
        assert_eq!(limit.current_daily_cost, dec!(48000));
        assert!(limit.blocked);
        assert_eq!(check.reservation, None);
    }

    #[test]
    fn test_reaching_limit_exactly_counts_as_reached() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::default().daily(dec!(100)), today);
        let check = limit.evaluate(dec!(100), today, Utc::now()).unwrap();
        assert!(!check.can_proceed);
    }

    #[test]
    fn test_warn_policy_proceeds_with_alert() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(
            CostLimitPolicy::default()
                .daily(dec!(100))
                .action(ActionOnLimit::Warn),
            today,
        );
        limit.current_daily_cost = dec!(90);

        let check = limit.evaluate(dec!(20), today, Utc::now()).unwrap();
        assert!(check.can_proceed);
        assert!(check.alert);
        assert!(!check.blocked);
        assert_eq!(check.exceeded, Some(LimitPeriod::Daily));
        assert_eq!(limit.current_daily_cost, dec!(110));
        assert_eq!(check.alerts.len(), 1);
        assert_eq!(check.alerts[0].kind, AlertKind::LimitReached);

        // still over the limit: alert flag stays up, notification is not repeated
        let again = limit.evaluate(dec!(5), today, Utc::now()).unwrap();
        assert!(again.can_proceed);
        assert!(again.alert);
        assert!(again.alerts.is_empty());
    }

    #[test]
    fn test_threshold_alert_is_one_shot_per_period() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::default().daily(dec!(1000)), today);

        let first = limit.evaluate(dec!(850), today, Utc::now()).unwrap();
        assert!(first.can_proceed);
        assert!(first.alert);
        assert_eq!(first.alerts[0].kind, AlertKind::Threshold);
        assert_eq!(first.alerts[0].percent, dec!(85));

        let second = limit.evaluate(dec!(10), today, Utc::now()).unwrap();
        assert!(!second.alert);
        assert!(second.alerts.is_empty());

        let tomorrow = today.succ_opt().unwrap();
        let third = limit.evaluate(dec!(900), tomorrow, Utc::now()).unwrap();
        assert!(third.alert);
    }

    #[test]
    fn test_daily_rollover_keeps_monthly_total() {
        let yesterday = day(2026, 3, 13);
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::default().daily(dec!(50000)), yesterday);
        limit.current_daily_cost = dec!(49000);
        limit.current_monthly_cost = dec!(120000);

        let check = limit.evaluate(dec!(3000), today, Utc::now()).unwrap();

        assert!(check.can_proceed);
        assert_eq!(limit.current_daily_cost, dec!(3000));
        assert_eq!(limit.current_monthly_cost, dec!(123000));
        assert_eq!(limit.current_date, today);
    }

    #[test]
    fn test_monthly_rollover_clears_limit_block() {
        let march = day(2026, 3, 31);
        let april = day(2026, 4, 1);
        let mut limit = limit_with(CostLimitPolicy::default().monthly(dec!(1000)), march);
        let refused = limit.evaluate(dec!(1500), march, Utc::now()).unwrap();
        assert!(!refused.can_proceed);

        let still = limit.evaluate(dec!(1), march, Utc::now()).unwrap();
        assert!(!still.can_proceed);
        assert_eq!(still.exceeded, Some(LimitPeriod::Monthly));

        let rolled = limit.evaluate(dec!(1), april, Utc::now()).unwrap();
        assert!(rolled.can_proceed);
        assert_eq!(limit.current_monthly_cost, dec!(1));
        assert!(!limit.blocked);
    }

    #[test]
    fn test_daily_block_does_not_clear_within_day_but_clears_next_day() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::default().daily(dec!(10)), today);
        assert!(!limit.evaluate(dec!(10), today, Utc::now()).unwrap().can_proceed);
        assert!(!limit.evaluate(dec!(1), today, Utc::now()).unwrap().can_proceed);
        assert!(limit.evaluate(dec!(1), day(2026, 3, 15), Utc::now()).unwrap().can_proceed);
    }

    #[test]
    fn test_manual_block_survives_rollover() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::unlimited(), today);
        limit.block(BlockCause::Manual, "chargeback under review", Utc::now());

        let check = limit.evaluate(dec!(1), day(2026, 5, 1), Utc::now()).unwrap();
        assert!(!check.can_proceed);
        assert_eq!(check.exceeded, None);
        assert_eq!(check.reason.as_deref(), Some("chargeback under review"));
    }

    #[test]
    fn test_release_ignores_rolled_periods() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::unlimited(), today);
        let check = limit.evaluate(dec!(40), today, Utc::now()).unwrap();
        let reservation = check.reservation.unwrap();

        limit.release(&reservation);
        assert_eq!(limit.current_daily_cost, dec!(0));
        assert_eq!(limit.current_monthly_cost, dec!(0));

        let check = limit.evaluate(dec!(40), today, Utc::now()).unwrap();
        limit.rollover(day(2026, 3, 15));
        limit.current_daily_cost = dec!(5);
        limit.release(&check.reservation.unwrap());
        assert_eq!(limit.current_daily_cost, dec!(5));
        assert_eq!(limit.current_monthly_cost, dec!(0));
    }

    #[test]
    fn test_unrepresentable_cost_is_rejected_without_blocking() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::default().daily(dec!(1000)), today);
        limit.current_daily_cost = dec!(10);
        limit.current_monthly_cost = dec!(10);

        let err = limit.evaluate(Decimal::MAX, today, Utc::now()).unwrap_err();

        assert!(matches!(err, crate::Error::InvalidAmount { .. }));
        assert!(!limit.blocked);
        assert_eq!(limit.current_daily_cost, dec!(10));
        assert!(limit.evaluate(dec!(5), today, Utc::now()).unwrap().can_proceed);
    }

    #[test]
    fn test_release_rearms_threshold_alert() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::default().daily(dec!(10000)), today);

        let refused_later = limit.evaluate(dec!(9000), today, Utc::now()).unwrap();
        assert_eq!(refused_later.alerts.len(), 1);
        let reservation = refused_later.reservation.unwrap();
        assert!(reservation.armed.daily_threshold);
        limit.release(&reservation);
        assert!(!limit.daily_alert_sent);

        let committed = limit.evaluate(dec!(8500), today, Utc::now()).unwrap();
        assert_eq!(committed.alerts.len(), 1);
        assert_eq!(committed.alerts[0].kind, AlertKind::Threshold);
        assert_eq!(committed.alerts[0].current, dec!(8500));
    }

    #[test]
    fn test_release_keeps_flags_raised_by_earlier_spend() {
        let today = day(2026, 3, 14);
        let mut limit = limit_with(CostLimitPolicy::default().daily(dec!(1000)), today);
        limit.evaluate(dec!(850), today, Utc::now()).unwrap();

        let check = limit.evaluate(dec!(50), today, Utc::now()).unwrap();
        let reservation = check.reservation.unwrap();
        assert_eq!(reservation.armed, AlertFlags::default());
        limit.release(&reservation);

        assert!(limit.daily_alert_sent);
        assert!(limit.evaluate(dec!(10), today, Utc::now()).unwrap().alerts.is_empty());
    }
}
