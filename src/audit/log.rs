//! Append-only decision log.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;

use super::decision::{DecisionFilter, GuardDecision};
use crate::types::DecisionId;
use crate::{Error, Result};

/// Store of guard decisions. Exposes no update or delete.
#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    fn name(&self) -> &str;

    /// Appends a decision and returns it with its assigned sequence.
    ///
    /// Re-recording an existing decision id fails with
    /// `LedgerImmutableViolation`.
    async fn record(&self, decision: GuardDecision) -> Result<GuardDecision>;

    async fn query(&self, filter: &DecisionFilter) -> Result<Vec<GuardDecision>>;

    /// Earliest successful deduction recorded under `key`.
    async fn find_successful_deduction(&self, key: &str) -> Result<Option<GuardDecision>>;
}

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    decisions: RwLock<Vec<GuardDecision>>,
    ids: DashMap<DecisionId, u64>,
    deductions: DashMap<String, GuardDecision>,
    sequence: AtomicU64,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.decisions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.decisions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl AuditLog for MemoryAuditLog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, mut decision: GuardDecision) -> Result<GuardDecision> {
        let mut decisions = self.decisions.write().await;
        match self.ids.entry(decision.id) {
            Entry::Occupied(_) => return Err(Error::immutable("guard_decision", decision.id)),
            Entry::Vacant(slot) => {
                decision.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                slot.insert(decision.sequence);
            }
        }

        if decision.is_successful_deduction()
            && let Some(key) = &decision.idempotency_key
        {
            self.deductions
                .entry(key.clone())
                .or_insert_with(|| decision.clone());
        }

        tracing::debug!(
            tenant = %decision.tenant_id,
            layer = %decision.layer,
            event = %decision.event,
            blocked = decision.blocked,
            sequence = decision.sequence,
            "Guard decision recorded"
        );
        decisions.push(decision.clone());
        Ok(decision)
    }

    async fn query(&self, filter: &DecisionFilter) -> Result<Vec<GuardDecision>> {
        let decisions = self.decisions.read().await;
        let matched = decisions.iter().filter(|d| filter.matches(d)).cloned();
        Ok(match filter.limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        })
    }

    async fn find_successful_deduction(&self, key: &str) -> Result<Option<GuardDecision>> {
        Ok(self.deductions.get(key).map(|d| d.value().clone()))
    }
}
