//! Revenue Guard Pipeline Tests
//!
//! End-to-end admission scenarios: replay, concurrency, cost limits, credits
//! and configuration loading.
//!
//! Run: cargo nextest run --test guard_pipeline

use std::sync::Arc;

use revenue_guard::audit::{AuditLog, DecisionEvent, DecisionFilter, GuardLayer, MemoryAuditLog};
use revenue_guard::guard::{
    BlockReason, GuardRequest, NoopNotifier, RevenueGuard, StaticPlanLimits, StaticSubscriptions,
};
use revenue_guard::ledger::{LedgerCredit, LedgerQuery, LedgerStore, MemoryLedgerStore};
use revenue_guard::types::{Reference, RequestContext, TenantId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

struct Harness {
    guard: Arc<RevenueGuard>,
    ledger: Arc<MemoryLedgerStore>,
    audit: Arc<MemoryAuditLog>,
    tenant: TenantId,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn harness(balance: Decimal) -> Harness {
    init_tracing();
    let ledger = Arc::new(MemoryLedgerStore::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let tenant = TenantId::new("klien-42");
    ledger.open_wallet(&tenant, "IDR").await.unwrap();
    ledger
        .credit(&tenant, LedgerCredit::topup(balance))
        .await
        .unwrap();

    let guard = RevenueGuard::builder()
        .ledger(ledger.clone())
        .audit(audit.clone())
        .subscriptions(Arc::new(StaticSubscriptions::allow_all()))
        .plan_limits(Arc::new(StaticPlanLimits::allow_all()))
        .notifier(Arc::new(NoopNotifier))
        .build()
        .unwrap();

    Harness {
        guard: Arc::new(guard),
        ledger,
        audit,
        tenant,
    }
}

impl Harness {
    async fn balance(&self) -> Decimal {
        self.ledger
            .wallet(&self.tenant)
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    async fn entry_count(&self) -> usize {
        self.ledger
            .entries(&LedgerQuery::for_tenant(self.tenant.clone()))
            .await
            .unwrap()
            .len()
    }

    fn request(&self, cost: Decimal) -> GuardRequest {
        GuardRequest::new(self.tenant.clone(), "send_message", cost)
    }
}

// =============================================================================
// Scenarios
// =============================================================================

mod scenario_tests {
    use super::*;

    #[tokio::test]
    async fn test_debit_replay_then_insufficient_balance() {
        let h = harness(dec!(10000)).await;

        let first = h
            .guard
            .evaluate(h.request(dec!(3000)).idempotency_key("k1"))
            .await
            .unwrap();
        assert!(first.allowed);
        assert_eq!(h.balance().await, dec!(7000));

        let replay = h
            .guard
            .evaluate(h.request(dec!(3000)).idempotency_key("k1"))
            .await
            .unwrap();
        assert!(replay.allowed);
        assert_eq!(replay, first);
        assert_eq!(h.balance().await, dec!(7000));

        let short = h.guard.evaluate(h.request(dec!(8000))).await.unwrap();
        assert!(!short.allowed);
        assert_eq!(short.blocked_at_layer, Some(GuardLayer::Saldo));
        assert!(matches!(
            short.clone().into_result(&h.tenant, "send_message"),
            Err(revenue_guard::Error::InsufficientBalance { .. })
        ));
        assert_eq!(h.balance().await, dec!(7000));
        assert!(h.ledger.reconcile(&h.tenant).await.unwrap().is_balanced());
    }

    #[tokio::test]
    async fn test_daily_limit_block_leaves_ledger_untouched() {
        let h = harness(dec!(100000)).await;
        h.guard.enforcer().configure(
            &h.tenant,
            revenue_guard::CostLimitPolicy::unlimited().daily(dec!(50000)),
        );

        let spent = h.guard.evaluate(h.request(dec!(48000))).await.unwrap();
        assert!(spent.allowed);
        let entries_before = h.entry_count().await;

        let blocked = h.guard.evaluate(h.request(dec!(3000))).await.unwrap();

        assert!(!blocked.allowed);
        assert_eq!(blocked.blocked_at_layer, Some(GuardLayer::CostLimit));
        assert!(blocked.reason.as_deref().unwrap().contains("daily"));
        assert_eq!(h.entry_count().await, entries_before);
        assert_eq!(h.balance().await, dec!(52000));
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_requests_charge_once() {
        let h = harness(dec!(10000)).await;

        let tasks = (0..12).map(|_| {
            let guard = h.guard.clone();
            let request = h.request(dec!(2000)).idempotency_key("campaign-9");
            tokio::spawn(async move { guard.evaluate(request).await })
        });
        let responses: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert!(responses.iter().all(|r| r == &responses[0]));
        assert!(responses[0].allowed);
        assert_eq!(h.balance().await, dec!(8000));

        let deductions = h
            .audit
            .query(&DecisionFilter::new().event(DecisionEvent::Deducted))
            .await
            .unwrap();
        assert_eq!(deductions.len(), 1);
        let replays = h
            .audit
            .query(&DecisionFilter::new().event(DecisionEvent::Replayed))
            .await
            .unwrap();
        assert_eq!(replays.len(), 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_requests_never_overdraw() {
        let h = harness(dec!(10000)).await;

        let tasks = (0..15).map(|i| {
            let guard = h.guard.clone();
            let request = h.request(dec!(3000)).idempotency_key(format!("msg-{i}"));
            tokio::spawn(async move { guard.evaluate(request).await })
        });
        let responses: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(responses.iter().filter(|r| r.allowed).count(), 3);
        assert!(
            responses
                .iter()
                .filter(|r| !r.allowed)
                .all(|r| matches!(r.block, Some(BlockReason::InsufficientBalance { .. })))
        );
        assert_eq!(h.balance().await, dec!(1000));
        assert!(h.ledger.reconcile(&h.tenant).await.unwrap().is_balanced());
        // Refused requests gave back their cost-limit reservation.
        let limit = h.guard.enforcer().limit(&h.tenant).unwrap();
        assert_eq!(limit.current_daily_cost, dec!(9000));
    }
}

// =============================================================================
// Audit trail
// =============================================================================

mod audit_tests {
    use super::*;

    #[tokio::test]
    async fn test_decisions_carry_request_context() {
        let h = harness(dec!(10000)).await;
        h.guard
            .evaluate(
                h.request(dec!(500))
                    .idempotency_key("m-77")
                    .reference(Reference::Message(77))
                    .context(RequestContext::new("203.0.113.9", "wa-gateway/1.4")),
            )
            .await
            .unwrap();

        let decisions = h
            .audit
            .query(&DecisionFilter::new().tenant(h.tenant.clone()).idempotency_key("m-77"))
            .await
            .unwrap();
        assert_eq!(decisions.len(), GuardLayer::COUNT);
        assert!(decisions.iter().all(|d| d.reference == Some(Reference::Message(77))));
        assert!(
            decisions
                .iter()
                .all(|d| d.context.ip.as_deref() == Some("203.0.113.9"))
        );

        let deduction = decisions.last().unwrap();
        assert_eq!(deduction.event, DecisionEvent::Deducted);
        assert_eq!(deduction.balance_before, Some(dec!(10000)));
        assert_eq!(deduction.balance_after, Some(dec!(9500)));

        let entry = h.ledger.find_by_idempotency_key("m-77").await.unwrap().unwrap();
        assert_eq!(entry.reference, Some(Reference::Message(77)));
    }

    #[tokio::test]
    async fn test_blocked_query_filters_by_layer() {
        let h = harness(dec!(1000)).await;
        h.guard.evaluate(h.request(dec!(5000))).await.unwrap();
        h.guard.evaluate(h.request(dec!(200))).await.unwrap();

        let blocked = h
            .audit
            .query(&DecisionFilter::new().blocked(true).layer(GuardLayer::Saldo))
            .await
            .unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].estimated_cost, dec!(5000));
        assert_eq!(h.guard.metrics().blocked(GuardLayer::Saldo), 1);
        assert_eq!(h.guard.metrics().evaluations_total.get(), 2);
    }
}

// =============================================================================
// Credits feeding the guard
// =============================================================================

mod credit_tests {
    use super::*;
    use revenue_guard::credit::{
        CreditLedger, CreditSource, MemoryCreditStore, SourceState, StaticSourceResolver,
    };

    #[tokio::test]
    async fn test_refund_restores_spending_power() {
        let h = harness(dec!(1000)).await;
        let refused = h.guard.evaluate(h.request(dec!(4000))).await.unwrap();
        assert!(!refused.allowed);

        let source = CreditSource::RefundRequest(501);
        let credits = CreditLedger::new(
            h.ledger.clone(),
            Arc::new(MemoryCreditStore::new()),
            Arc::new(StaticSourceResolver::new().with(source.clone(), SourceState::Approved)),
        );
        credits
            .grant_credit(&h.tenant, dec!(5000), source.clone(), "finance@klien.id")
            .await
            .unwrap();
        assert!(
            credits
                .grant_credit(&h.tenant, dec!(5000), source, "finance@klien.id")
                .await
                .is_err()
        );

        let admitted = h.guard.evaluate(h.request(dec!(4000))).await.unwrap();
        assert!(admitted.allowed);
        assert_eq!(h.balance().await, dec!(2000));
        assert!(h.ledger.reconcile(&h.tenant).await.unwrap().is_balanced());
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config_tests {
    use super::*;
    use revenue_guard::config::{ConfigBuilder, GuardSettings, MemoryConfigProvider};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_settings_loaded_from_file_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guard.json");
        std::fs::write(
            &path,
            r#"{"cost_limit": {"default_daily_limit": "2500", "alert_threshold_percent": 90}}"#,
        )
        .unwrap();

        let provider = ConfigBuilder::new()
            .memory(MemoryConfigProvider::new().value("notification.timeout_ms", "250"))
            .file(&path)
            .build()
            .await
            .unwrap();
        let settings = GuardSettings::load(&provider).await.unwrap();

        assert_eq!(settings.default_daily_limit, Some(dec!(2500)));
        assert_eq!(settings.alert_threshold_percent, dec!(90));
        assert_eq!(settings.notification_timeout_ms, 250);
        assert_eq!(settings.default_currency, "IDR");

        let h = harness(dec!(10000)).await;
        h.guard.reload_settings(&provider).await.unwrap();
        let blocked = h.guard.evaluate(h.request(dec!(3000))).await.unwrap();
        assert_eq!(blocked.blocked_at_layer, Some(GuardLayer::CostLimit));
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let provider = MemoryConfigProvider::new().value("ledger.default_currency", "rupiah");
        assert!(GuardSettings::load(&provider).await.is_err());
    }
}
