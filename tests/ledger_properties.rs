//! Ledger and Cost Limit Property Tests
//!
//! Balance reconciliation, overdraft safety under concurrency, rollover,
//! persistent blocks and immutability of sealed records.
//!
//! Run: cargo nextest run --test ledger_properties

use std::sync::Arc;

use revenue_guard::ledger::{
    EntryKind, EntryStatus, LedgerCredit, LedgerDebit, LedgerQuery, LedgerStore,
    MemoryLedgerStore,
};
use revenue_guard::types::TenantId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

async fn funded(tenant: &str, balance: Decimal) -> (Arc<MemoryLedgerStore>, TenantId) {
    let ledger = Arc::new(MemoryLedgerStore::new());
    let tenant = TenantId::new(tenant);
    ledger.open_wallet(&tenant, "IDR").await.unwrap();
    if balance > Decimal::ZERO {
        ledger
            .credit(&tenant, LedgerCredit::topup(balance))
            .await
            .unwrap();
    }
    (ledger, tenant)
}

// =============================================================================
// Balance reconciliation
// =============================================================================

mod reconciliation_tests {
    use super::*;

    #[tokio::test]
    async fn test_balance_equals_sum_of_completed_entries() {
        let (ledger, tenant) = funded("klien-recon", dec!(50000)).await;

        ledger
            .debit(&tenant, LedgerDebit::usage(dec!(1250.5)).idempotency_key("u-1"))
            .await
            .unwrap();
        ledger
            .credit(
                &tenant,
                LedgerCredit::new(dec!(300), EntryKind::Bonus).description("Welcome bonus"),
            )
            .await
            .unwrap();
        // Rejected debit leaves no trace.
        assert!(
            ledger
                .debit(&tenant, LedgerDebit::usage(dec!(1000000)))
                .await
                .is_err()
        );

        let settled = ledger
            .open_pending(&tenant, LedgerCredit::topup(dec!(20000)))
            .await
            .unwrap();
        let abandoned = ledger
            .open_pending(&tenant, LedgerCredit::topup(dec!(99999)))
            .await
            .unwrap();
        ledger
            .transition(&settled.id, EntryStatus::Completed)
            .await
            .unwrap();
        ledger
            .transition(&abandoned.id, EntryStatus::Failed)
            .await
            .unwrap();

        let rec = ledger.reconcile(&tenant).await.unwrap();
        assert!(rec.is_balanced(), "drift: {}", rec.drift());
        assert_eq!(rec.wallet_balance, dec!(69049.5));
        assert_eq!(rec.completed_entries, 4);

        let entries = ledger
            .entries(&LedgerQuery::for_tenant(tenant.clone()))
            .await
            .unwrap();
        assert!(entries.iter().all(|e| e.is_consistent()));
        assert!(entries.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }
}

// =============================================================================
// No overdraft under concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_overdraw() {
        let (ledger, tenant) = funded("klien-race", dec!(10000)).await;

        let tasks = (0..20).map(|i| {
            let ledger = ledger.clone();
            let tenant = tenant.clone();
            tokio::spawn(async move {
                ledger
                    .debit(
                        &tenant,
                        LedgerDebit::usage(dec!(1500)).idempotency_key(format!("race-{i}")),
                    )
                    .await
            })
        });
        let results: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 6);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
            e,
            revenue_guard::Error::InsufficientBalance { .. }
        )));

        let wallet = ledger.wallet(&tenant).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(1000));
        assert!(ledger.reconcile(&tenant).await.unwrap().is_balanced());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_key_debits_apply_once() {
        let (ledger, tenant) = funded("klien-dupe", dec!(10000)).await;

        let tasks = (0..10).map(|_| {
            let ledger = ledger.clone();
            let tenant = tenant.clone();
            tokio::spawn(async move {
                ledger
                    .debit(&tenant, LedgerDebit::usage(dec!(2500)).idempotency_key("same"))
                    .await
            })
        });
        let results: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
        for result in &results {
            if let Err(revenue_guard::Error::DuplicateRequest { original, .. }) = result {
                assert_eq!(original.id, winner.id);
            }
        }
        assert_eq!(
            ledger.wallet(&tenant).await.unwrap().unwrap().balance,
            dec!(7500)
        );
    }
}

// =============================================================================
// Cost limits: rollover, persistent block, reconciliation
// =============================================================================

mod cost_limit_tests {
    use super::*;
    use chrono::{Offset, TimeZone, Utc};
    use revenue_guard::cost_limit::{ActionOnLimit, CostLimitEnforcer, CostLimitPolicy, LimitPeriod};

    fn enforcer(policy: CostLimitPolicy) -> CostLimitEnforcer {
        CostLimitEnforcer::new(policy, Utc.fix())
    }

    #[test]
    fn test_rollover_resets_daily_but_not_monthly() {
        let enforcer = enforcer(CostLimitPolicy::unlimited().daily(dec!(100000)));
        let tenant = TenantId::new("klien-roll");
        let yesterday = Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap();
        let today = Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap();

        enforcer.add_cost_at(&tenant, dec!(4000), yesterday).unwrap();
        let check = enforcer.add_cost_at(&tenant, dec!(1000), today).unwrap();

        assert!(check.can_proceed);
        assert_eq!(check.daily_total, dec!(1000));
        assert_eq!(check.monthly_total, dec!(5000));
    }

    #[test]
    fn test_month_change_resets_monthly_total() {
        let enforcer = enforcer(CostLimitPolicy::unlimited().monthly(dec!(100000)));
        let tenant = TenantId::new("klien-month");

        enforcer
            .add_cost_at(&tenant, dec!(9000), Utc.with_ymd_and_hms(2026, 3, 31, 20, 0, 0).unwrap())
            .unwrap();
        let check = enforcer
            .add_cost_at(&tenant, dec!(100), Utc.with_ymd_and_hms(2026, 4, 1, 1, 0, 0).unwrap())
            .unwrap();

        assert_eq!(check.daily_total, dec!(100));
        assert_eq!(check.monthly_total, dec!(100));
    }

    #[test]
    fn test_block_persists_until_period_rolls_over() {
        let enforcer = enforcer(
            CostLimitPolicy::unlimited()
                .daily(dec!(10000))
                .action(ActionOnLimit::Block),
        );
        let tenant = TenantId::new("klien-block");
        let morning = Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 5, 2, 20, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2026, 5, 3, 8, 0, 0).unwrap();

        assert!(enforcer.add_cost_at(&tenant, dec!(6000), morning).unwrap().can_proceed);
        let tripped = enforcer.add_cost_at(&tenant, dec!(5000), morning).unwrap();
        assert!(!tripped.can_proceed);
        assert_eq!(tripped.exceeded, Some(LimitPeriod::Daily));

        // Even a tiny spend stays blocked for the rest of the day.
        let still = enforcer.add_cost_at(&tenant, dec!(1), evening).unwrap();
        assert!(!still.can_proceed);
        assert_eq!(still.daily_total, dec!(6000));

        let fresh = enforcer.add_cost_at(&tenant, dec!(1), next_day).unwrap();
        assert!(fresh.can_proceed);
        assert_eq!(fresh.daily_total, dec!(1));
    }

    #[test]
    fn test_daily_limit_scenario() {
        let enforcer = enforcer(
            CostLimitPolicy::unlimited()
                .daily(dec!(50000))
                .action(ActionOnLimit::Block),
        );
        let tenant = TenantId::new("klien-scenario");
        let now = Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap();

        assert!(enforcer.add_cost_at(&tenant, dec!(48000), now).unwrap().can_proceed);
        let check = enforcer.add_cost_at(&tenant, dec!(3000), now).unwrap();

        assert!(!check.can_proceed);
        assert!(check.blocked);
        assert!(check.reason.unwrap().contains("daily"));
        assert_eq!(check.daily_total, dec!(48000));
    }

    #[tokio::test]
    async fn test_totals_reconciled_from_ledger_after_lost_debit() {
        let (ledger, tenant) = funded("klien-drift", dec!(10000)).await;
        let enforcer = CostLimitEnforcer::default();

        enforcer.add_cost(&tenant, dec!(2000)).unwrap();
        ledger
            .debit(&tenant, LedgerDebit::usage(dec!(2000)))
            .await
            .unwrap();
        // Spend reserved but the process died before the debit.
        enforcer.add_cost(&tenant, dec!(5000)).unwrap();
        assert_eq!(
            enforcer.limit(&tenant).unwrap().total_for(LimitPeriod::Daily),
            dec!(7000)
        );

        let entries = ledger
            .entries(&LedgerQuery::for_tenant(tenant.clone()))
            .await
            .unwrap();
        let repaired = enforcer.reconcile_from_ledger(&tenant, &entries, Utc::now());

        assert_eq!(repaired.current_daily_cost, dec!(2000));
        assert_eq!(repaired.current_monthly_cost, dec!(2000));
    }
}

// =============================================================================
// Immutability
// =============================================================================

mod immutability_tests {
    use super::*;
    use revenue_guard::Error;
    use revenue_guard::audit::{AuditLog, GuardLayer, MemoryAuditLog, builder};
    use revenue_guard::guard::GuardRequest;

    #[tokio::test]
    async fn test_completed_entry_cannot_change() {
        let (ledger, tenant) = funded("klien-seal", dec!(5000)).await;
        let entry = ledger
            .debit(&tenant, LedgerDebit::usage(dec!(1000)))
            .await
            .unwrap();

        for status in [EntryStatus::Failed, EntryStatus::Cancelled, EntryStatus::Completed] {
            let err = ledger.transition(&entry.id, status).await.unwrap_err();
            assert!(matches!(err, Error::LedgerImmutableViolation { .. }));
            assert!(err.is_contract_violation());
        }

        let stored = ledger.entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(stored, entry);
    }

    #[tokio::test]
    async fn test_failed_entry_is_sealed() {
        let (ledger, tenant) = funded("klien-fail", dec!(0)).await;
        let pending = ledger
            .open_pending(&tenant, LedgerCredit::topup(dec!(1000)))
            .await
            .unwrap();
        ledger
            .transition(&pending.id, EntryStatus::Failed)
            .await
            .unwrap();

        let err = ledger
            .transition(&pending.id, EntryStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LedgerImmutableViolation { .. }));
        assert_eq!(ledger.wallet(&tenant).await.unwrap().unwrap().balance, dec!(0));
    }

    #[tokio::test]
    async fn test_recorded_decision_cannot_be_rewritten() {
        let audit = MemoryAuditLog::new();
        let request = GuardRequest::new(TenantId::new("klien-audit"), "send_message", dec!(10));
        let decision = builder::passed(&request, GuardLayer::Subscription);

        let recorded = audit.record(decision.clone()).await.unwrap();
        let mut tampered = decision;
        tampered.blocked = true;
        let err = audit.record(tampered).await.unwrap_err();

        assert!(matches!(err, Error::LedgerImmutableViolation { .. }));
        assert_eq!(audit.len().await, 1);
        assert!(!recorded.blocked);
    }
}
