//! The six-layer admission pipeline.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;

use super::collaborators::{NotificationDispatcher, PlanLimitChecker, SubscriptionChecker, TracingNotifier};
use super::request::{BlockReason, GuardRequest, GuardResponse};
use crate::audit::{AuditLog, GuardLayer, MemoryAuditLog, builder};
use crate::config::{ConfigProvider, GuardSettings};
use crate::cost_limit::{CostAlert, CostCheck, CostLimitEnforcer, CostReservation};
use crate::ledger::{EntryKind, LedgerDebit, LedgerEntry, LedgerStore};
use crate::observability::{MetricsRegistry, SpanContext};
use crate::types::TenantId;
use crate::types::money::ensure_positive;
use crate::{Error, Result};

/// Admission pipeline in front of every billable action.
///
/// Layers run in order and the first refusal wins:
/// subscription, plan limit, anti-double, cost limit, saldo, deduction.
/// Every evaluated layer appends exactly one decision to the audit log.
/// Requests sharing an idempotency key are serialised from the anti-double
/// layer through deduction.
pub struct RevenueGuard {
    ledger: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditLog>,
    enforcer: Arc<CostLimitEnforcer>,
    subscriptions: Arc<dyn SubscriptionChecker>,
    plan_limits: Arc<dyn PlanLimitChecker>,
    notifier: Arc<dyn NotificationDispatcher>,
    settings: RwLock<Arc<GuardSettings>>,
    metrics: Arc<MetricsRegistry>,
    spans: SpanContext,
    key_locks: KeyLocks,
}

impl std::fmt::Debug for RevenueGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevenueGuard")
            .field("ledger", &self.ledger.name())
            .field("audit", &self.audit.name())
            .field("settings", &self.settings())
            .finish_non_exhaustive()
    }
}

/// What the anti-double layer found under a key.
struct PriorOutcome {
    tenant: TenantId,
    action: Option<String>,
    cost: Decimal,
    response: GuardResponse,
}

impl PriorOutcome {
    fn from_entry(entry: &LedgerEntry) -> Option<Self> {
        if entry.kind != EntryKind::Usage || !entry.is_completed() {
            return None;
        }
        Some(Self {
            tenant: entry.tenant_id.clone(),
            action: entry
                .metadata
                .get("action")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            cost: entry.magnitude(),
            response: GuardResponse::allowed(
                entry.magnitude(),
                entry.balance_before,
                entry.balance_after,
                entry.id,
            ),
        })
    }
}

impl RevenueGuard {
    pub fn builder() -> RevenueGuardBuilder {
        RevenueGuardBuilder::default()
    }

    /// Runs the pipeline for one request.
    ///
    /// Refusals are `Ok` responses with `allowed == false`; `Err` is reserved
    /// for invalid input and infrastructure failures.
    pub async fn evaluate(&self, request: GuardRequest) -> Result<GuardResponse> {
        let span = self
            .spans
            .guard_evaluate_span(&request.tenant_id, &request.action);
        self.metrics.record_evaluation_start();

        let outcome = self.run(&request).instrument(span.span().clone()).await;

        let (allowed, blocked_at) = match &outcome {
            Ok(response) => (response.allowed, response.blocked_at_layer),
            Err(_) => (false, None),
        };
        let latency_ms = span.finish(allowed, blocked_at);
        self.metrics.record_evaluation_end(latency_ms);
        outcome
    }

    async fn run(&self, request: &GuardRequest) -> Result<GuardResponse> {
        ensure_positive(request.estimated_cost)?;
        let tenant = &request.tenant_id;
        let settings = self.settings();

        if !self.subscriptions.is_active(tenant).await? {
            return self
                .block(
                    request,
                    BlockReason::NoActiveSubscription,
                    format!("No active subscription for tenant {tenant}"),
                )
                .await;
        }
        self.pass(request, GuardLayer::Subscription).await?;

        if !self.plan_limits.within_limits(tenant, &request.action).await? {
            return self
                .block(
                    request,
                    BlockReason::PlanLimitExceeded,
                    format!("Plan limit exceeded for action {}", request.action),
                )
                .await;
        }
        self.pass(request, GuardLayer::PlanLimit).await?;

        let _key_guard = match &request.idempotency_key {
            Some(key) => Some(self.key_locks.acquire(key).await),
            None => None,
        };

        if let Some(key) = &request.idempotency_key {
            if let Some(prior) = self.find_prior(key).await? {
                return self.replay_or_conflict(request, key, prior).await;
            }
        }
        self.pass(request, GuardLayer::AntiDouble).await?;

        let check = self.enforcer.add_cost(tenant, request.estimated_cost)?;
        if !check.can_proceed {
            self.dispatch_alerts(&check.alerts, &settings).await;
            let reason = check
                .reason
                .clone()
                .unwrap_or_else(|| "Cost limit exceeded".to_string());
            return self
                .block(
                    request,
                    BlockReason::CostLimitExceeded {
                        period: check.exceeded,
                    },
                    reason,
                )
                .await;
        }
        // Every exit from here on returns the spend unless the debit commits.
        let held = HeldSpend::new(&self.enforcer, &check);
        self.audit
            .record(builder::passed_cost_limit(request, &check))
            .await?;

        if let Some((block, reason)) = self.check_saldo(request).await? {
            drop(held);
            return self.block(request, block, reason).await;
        }
        self.pass(request, GuardLayer::Saldo).await?;

        self.deduct(request, &check, held, &settings).await
    }

    async fn check_saldo(&self, request: &GuardRequest) -> Result<Option<(BlockReason, String)>> {
        let affordability = match self
            .ledger
            .can_afford(&request.tenant_id, request.estimated_cost)
            .await
        {
            Ok(a) => a,
            Err(err) => {
                return match BlockReason::from_error(&err) {
                    Some(block) => Ok(Some((block, err.to_string()))),
                    None => Err(err),
                };
            }
        };

        if !affordability.active {
            return Ok(Some((
                BlockReason::WalletInactive,
                format!("Wallet for tenant {} is inactive", request.tenant_id),
            )));
        }
        if !affordability.sufficient() {
            return Ok(Some((
                BlockReason::InsufficientBalance {
                    required: affordability.required,
                    available: affordability.balance,
                },
                format!(
                    "Insufficient balance: {} required, {} available",
                    affordability.required, affordability.balance
                ),
            )));
        }
        Ok(None)
    }

    async fn deduct(
        &self,
        request: &GuardRequest,
        check: &CostCheck,
        held: HeldSpend<'_>,
        settings: &GuardSettings,
    ) -> Result<GuardResponse> {
        let tenant = &request.tenant_id;
        let mut debit = LedgerDebit::usage(request.estimated_cost)
            .description(format!("Usage: {}", request.action))
            .maybe_idempotency_key(request.idempotency_key.clone())
            .metadata(json!({ "action": request.action }));
        if let Some(reference) = &request.reference {
            debit = debit.reference(reference.clone());
        }

        let span = self.spans.ledger_debit_span(tenant, request.estimated_cost);
        let result = self
            .ledger
            .debit(tenant, debit)
            .instrument(span.clone())
            .await;

        match result {
            Ok(entry) => {
                held.commit();
                span.record("entry_id", tracing::field::display(entry.id));
                let response = GuardResponse::allowed(
                    entry.magnitude(),
                    entry.balance_before,
                    entry.balance_after,
                    entry.id,
                );
                // The ledger line is authoritative; a lost audit row is recovered from it on replay.
                if let Err(err) = self
                    .audit
                    .record(builder::deducted(request, &entry, Some(check)))
                    .await
                {
                    tracing::error!(
                        tenant = %tenant,
                        entry_id = %entry.id,
                        error = %err,
                        "Failed to record deduction decision"
                    );
                }
                self.metrics.record_allowed(entry.magnitude());
                tracing::info!(
                    tenant = %tenant,
                    action = %request.action,
                    amount = %entry.magnitude(),
                    balance_after = %entry.balance_after,
                    "Request admitted"
                );
                self.dispatch_alerts(&check.alerts, settings).await;
                Ok(response)
            }
            Err(Error::DuplicateRequest { key, original }) => {
                drop(held);
                match PriorOutcome::from_entry(&original) {
                    Some(prior) => self.replay_or_conflict(request, &key, prior).await,
                    None => self.conflict(request, &key).await,
                }
            }
            Err(err) => {
                drop(held);
                match BlockReason::from_error(&err) {
                    Some(block) => {
                        let mut response = GuardResponse::blocked(block, err.to_string());
                        response.blocked_at_layer = Some(GuardLayer::Deduction);
                        self.record_block(request, &response).await?;
                        Ok(response)
                    }
                    None => {
                        tracing::error!(tenant = %tenant, error = %err, "Deduction failed");
                        Err(err)
                    }
                }
            }
        }
    }

    async fn find_prior(&self, key: &str) -> Result<Option<PriorOutcome>> {
        if let Some(decision) = self.audit.find_successful_deduction(key).await? {
            if let Some(response) = builder::response_from_deduction(&decision) {
                return Ok(Some(PriorOutcome {
                    tenant: decision.tenant_id,
                    action: decision.action,
                    cost: decision.estimated_cost,
                    response,
                }));
            }
        }

        match self.ledger.find_by_idempotency_key(key).await? {
            Some(entry) => match PriorOutcome::from_entry(&entry) {
                Some(prior) => Ok(Some(prior)),
                // Key already names a non-usage line.
                None => Ok(Some(PriorOutcome {
                    tenant: entry.tenant_id,
                    action: None,
                    cost: Decimal::MIN,
                    response: GuardResponse::blocked(
                        BlockReason::IdempotencyConflict {
                            key: key.to_string(),
                        },
                        "Idempotency key already used",
                    ),
                })),
            },
            None => Ok(None),
        }
    }

    async fn replay_or_conflict(
        &self,
        request: &GuardRequest,
        key: &str,
        prior: PriorOutcome,
    ) -> Result<GuardResponse> {
        let other_action = prior
            .action
            .as_deref()
            .is_some_and(|action| action != request.action);
        if prior.tenant != request.tenant_id
            || other_action
            || prior.cost != request.estimated_cost
            || !prior.response.allowed
        {
            return self.conflict(request, key).await;
        }

        self.audit
            .record(builder::replayed(request, &prior.response))
            .await?;
        self.metrics.record_replay();
        tracing::info!(
            tenant = %request.tenant_id,
            key,
            entry_id = ?prior.response.entry_id,
            "Replaying original response"
        );
        Ok(prior.response)
    }

    async fn conflict(&self, request: &GuardRequest, key: &str) -> Result<GuardResponse> {
        tracing::warn!(tenant = %request.tenant_id, key, "Idempotency key reused with different parameters");
        self.block(
            request,
            BlockReason::IdempotencyConflict {
                key: key.to_string(),
            },
            format!("Idempotency key {key} reused with different parameters"),
        )
        .await
    }

    async fn pass(&self, request: &GuardRequest, layer: GuardLayer) -> Result<()> {
        self.audit.record(builder::passed(request, layer)).await?;
        Ok(())
    }

    async fn block(
        &self,
        request: &GuardRequest,
        block: BlockReason,
        reason: String,
    ) -> Result<GuardResponse> {
        let response = GuardResponse::blocked(block, reason);
        self.record_block(request, &response).await?;
        Ok(response)
    }

    async fn record_block(&self, request: &GuardRequest, response: &GuardResponse) -> Result<()> {
        self.audit.record(builder::blocked(request, response)).await?;
        let layer = response.blocked_at_layer.unwrap_or(GuardLayer::Deduction);
        self.metrics.record_blocked(layer);
        tracing::info!(
            tenant = %request.tenant_id,
            action = %request.action,
            layer = %layer,
            reason = response.reason.as_deref().unwrap_or_default(),
            "Request blocked"
        );
        Ok(())
    }

    /// Delivers alerts with a per-alert timeout. Failures are logged only.
    async fn dispatch_alerts(&self, alerts: &[CostAlert], settings: &GuardSettings) {
        let timeout = settings.notification_timeout();
        for alert in alerts {
            match tokio::time::timeout(timeout, self.notifier.notify(alert)).await {
                Ok(Ok(())) => {
                    tracing::debug!(tenant = %alert.tenant_id, period = %alert.period, "Cost alert delivered");
                }
                Ok(Err(err)) => {
                    self.metrics.record_notification_failure();
                    tracing::warn!(
                        tenant = %alert.tenant_id,
                        period = %alert.period,
                        error = %err,
                        "Cost alert delivery failed"
                    );
                }
                Err(_) => {
                    self.metrics.record_notification_failure();
                    tracing::warn!(
                        tenant = %alert.tenant_id,
                        period = %alert.period,
                        timeout_ms = timeout.as_millis() as u64,
                        "Cost alert delivery timed out"
                    );
                }
            }
        }
    }

    /// Reloads settings from `provider` and applies the new cost-limit defaults.
    pub async fn reload_settings<P>(&self, provider: &P) -> Result<Arc<GuardSettings>>
    where
        P: ConfigProvider + ?Sized,
    {
        let settings = Arc::new(GuardSettings::load(provider).await?);
        self.enforcer.apply_settings(&settings);
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings.clone();
        Ok(settings)
    }

    pub fn settings(&self) -> Arc<GuardSettings> {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    pub fn enforcer(&self) -> &Arc<CostLimitEnforcer> {
        &self.enforcer
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}

/// Builder for [`RevenueGuard`].
#[derive(Default)]
pub struct RevenueGuardBuilder {
    ledger: Option<Arc<dyn LedgerStore>>,
    audit: Option<Arc<dyn AuditLog>>,
    enforcer: Option<Arc<CostLimitEnforcer>>,
    subscriptions: Option<Arc<dyn SubscriptionChecker>>,
    plan_limits: Option<Arc<dyn PlanLimitChecker>>,
    notifier: Option<Arc<dyn NotificationDispatcher>>,
    settings: Option<GuardSettings>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl RevenueGuardBuilder {
    pub fn ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn enforcer(mut self, enforcer: Arc<CostLimitEnforcer>) -> Self {
        self.enforcer = Some(enforcer);
        self
    }

    pub fn subscriptions(mut self, subscriptions: Arc<dyn SubscriptionChecker>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    pub fn plan_limits(mut self, plan_limits: Arc<dyn PlanLimitChecker>) -> Self {
        self.plan_limits = Some(plan_limits);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn settings(mut self, settings: GuardSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<RevenueGuard> {
        let ledger = self
            .ledger
            .ok_or_else(|| Error::Config("ledger store is required".into()))?;
        let subscriptions = self
            .subscriptions
            .ok_or_else(|| Error::Config("subscription checker is required".into()))?;
        let plan_limits = self
            .plan_limits
            .ok_or_else(|| Error::Config("plan limit checker is required".into()))?;

        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        let enforcer = self
            .enforcer
            .unwrap_or_else(|| Arc::new(CostLimitEnforcer::from_settings(&settings)));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(MemoryAuditLog::new()));

        tracing::debug!(
            ledger = ledger.name(),
            audit = audit.name(),
            "Revenue guard built"
        );

        Ok(RevenueGuard {
            ledger,
            audit,
            enforcer,
            subscriptions,
            plan_limits,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier)),
            settings: RwLock::new(Arc::new(settings)),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(MetricsRegistry::new())),
            spans: SpanContext::default(),
            key_locks: KeyLocks::default(),
        })
    }
}

/// Cost-limit spend reserved by one evaluation. Returned to the enforcer on
/// drop unless the debit committed.
struct HeldSpend<'a> {
    enforcer: &'a CostLimitEnforcer,
    reservation: Option<CostReservation>,
}

impl<'a> HeldSpend<'a> {
    fn new(enforcer: &'a CostLimitEnforcer, check: &CostCheck) -> Self {
        Self {
            enforcer,
            reservation: check.reservation.clone(),
        }
    }

    fn commit(mut self) {
        self.reservation = None;
    }
}

impl Drop for HeldSpend<'_> {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            self.enforcer.release(&reservation);
        }
    }
}

/// Per-idempotency-key async locks, dropped when no request holds them.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            lock,
            guard: Some(guard),
        }
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Map entry plus our handle: no other request is waiting.
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
    }
}
