//! External systems the guard consults.

use dashmap::DashMap;

use crate::Result;
use crate::cost_limit::{AlertKind, CostAlert};
use crate::types::TenantId;

#[async_trait::async_trait]
pub trait SubscriptionChecker: Send + Sync {
    async fn is_active(&self, tenant: &TenantId) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait PlanLimitChecker: Send + Sync {
    /// Whether `action` is still within the tenant's plan quota.
    async fn within_limits(&self, tenant: &TenantId, action: &str) -> Result<bool>;
}

/// Delivers cost-limit alerts. Failures never affect a guard decision.
#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, alert: &CostAlert) -> Result<()>;
}

/// Subscription table with a default for unknown tenants.
#[derive(Debug)]
pub struct StaticSubscriptions {
    default_active: bool,
    tenants: DashMap<TenantId, bool>,
}

impl StaticSubscriptions {
    pub fn allow_all() -> Self {
        Self {
            default_active: true,
            tenants: DashMap::new(),
        }
    }

    pub fn deny_all() -> Self {
        Self {
            default_active: false,
            tenants: DashMap::new(),
        }
    }

    pub fn set(&self, tenant: TenantId, active: bool) {
        self.tenants.insert(tenant, active);
    }
}

#[async_trait::async_trait]
impl SubscriptionChecker for StaticSubscriptions {
    async fn is_active(&self, tenant: &TenantId) -> Result<bool> {
        Ok(self
            .tenants
            .get(tenant)
            .map(|a| *a.value())
            .unwrap_or(self.default_active))
    }
}

/// Plan quota table keyed by tenant and action.
#[derive(Debug)]
pub struct StaticPlanLimits {
    default_allowed: bool,
    rules: DashMap<(TenantId, String), bool>,
}

impl StaticPlanLimits {
    pub fn allow_all() -> Self {
        Self {
            default_allowed: true,
            rules: DashMap::new(),
        }
    }

    pub fn set(&self, tenant: TenantId, action: impl Into<String>, allowed: bool) {
        self.rules.insert((tenant, action.into()), allowed);
    }
}

#[async_trait::async_trait]
impl PlanLimitChecker for StaticPlanLimits {
    async fn within_limits(&self, tenant: &TenantId, action: &str) -> Result<bool> {
        Ok(self
            .rules
            .get(&(tenant.clone(), action.to_string()))
            .map(|a| *a.value())
            .unwrap_or(self.default_allowed))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait::async_trait]
impl NotificationDispatcher for NoopNotifier {
    async fn notify(&self, _alert: &CostAlert) -> Result<()> {
        Ok(())
    }
}

/// Emits alerts as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait::async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn notify(&self, alert: &CostAlert) -> Result<()> {
        match alert.kind {
            AlertKind::Threshold => tracing::info!(
                tenant = %alert.tenant_id,
                period = %alert.period,
                percent = %alert.percent,
                limit = %alert.limit,
                "Cost threshold crossed"
            ),
            AlertKind::LimitReached => tracing::warn!(
                tenant = %alert.tenant_id,
                period = %alert.period,
                current = %alert.current,
                limit = %alert.limit,
                blocked = alert.blocked,
                "Cost limit reached"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_subscriptions() {
        let subs = StaticSubscriptions::allow_all();
        let lapsed = TenantId::new("lapsed");
        subs.set(lapsed.clone(), false);

        assert!(subs.is_active(&TenantId::new("any")).await.unwrap());
        assert!(!subs.is_active(&lapsed).await.unwrap());
        assert!(
            !StaticSubscriptions::deny_all()
                .is_active(&TenantId::new("any"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_static_plan_limits_per_action() {
        let limits = StaticPlanLimits::allow_all();
        let tenant = TenantId::new("starter");
        limits.set(tenant.clone(), "send_campaign", false);

        assert!(limits.within_limits(&tenant, "send_message").await.unwrap());
        assert!(!limits.within_limits(&tenant, "send_campaign").await.unwrap());
    }
}
