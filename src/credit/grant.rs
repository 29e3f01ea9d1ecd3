//! Granting non-usage credits.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;

use super::source::{CreditSource, SourceResolver};
use super::store::{CreditEntry, CreditStore};
use crate::ledger::{LedgerCredit, LedgerEntry, LedgerStore};
use crate::types::money::ensure_positive;
use crate::types::{CreditId, TenantId};
use crate::{Error, Result};

/// Entry point for the refund and dispute subsystems.
pub struct CreditLedger {
    ledger: Arc<dyn LedgerStore>,
    store: Arc<dyn CreditStore>,
    resolver: Arc<dyn SourceResolver>,
}

impl CreditLedger {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        store: Arc<dyn CreditStore>,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        Self {
            ledger,
            store,
            resolver,
        }
    }

    /// Credits the tenant's wallet for an approved source, exactly once per source.
    pub async fn grant_credit(
        &self,
        tenant: &TenantId,
        amount: Decimal,
        source: CreditSource,
        approver: &str,
    ) -> Result<CreditEntry> {
        let amount = ensure_positive(amount)?;

        let state = self.resolver.resolve(&source).await?;
        if !state.is_creditable() {
            tracing::warn!(tenant = %tenant, source = %source, state = state.as_str(), "Credit refused");
            return Err(Error::InvalidSourceState {
                source_ref: source.to_string(),
                state: state.as_str().to_string(),
            });
        }

        self.store.claim(&source).await?;
        let entry = match self.write_ledger_line(tenant, amount, &source, approver).await {
            Ok(entry) => entry,
            Err(err) => {
                self.store.release(&source).await?;
                return Err(err);
            }
        };

        let now = Utc::now();
        let credit = CreditEntry {
            id: CreditId::new(),
            tenant_id: tenant.clone(),
            wallet_id: entry.wallet_id,
            amount: entry.amount,
            currency: entry.currency.clone(),
            description: entry.description.clone(),
            source,
            approved_by: approver.to_string(),
            approved_at: now,
            ledger_entry_id: entry.id,
            created_at: now,
        };
        let credit = self.store.complete(credit).await?;

        tracing::info!(
            tenant = %tenant,
            credit_id = %credit.id,
            source = %credit.source,
            amount = %credit.amount,
            approver,
            "Credit granted"
        );
        Ok(credit)
    }

    /// Writes the ledger line, adopting an existing line for this source.
    async fn write_ledger_line(
        &self,
        tenant: &TenantId,
        amount: Decimal,
        source: &CreditSource,
        approver: &str,
    ) -> Result<LedgerEntry> {
        let credit = LedgerCredit::new(amount, source.entry_kind())
            .description(format!("Credit for {source}"))
            .reference(source.reference())
            .idempotency_key(source.idempotency_key())
            .metadata(json!({ "approved_by": approver }));

        match self.ledger.credit(tenant, credit).await {
            Ok(entry) => Ok(entry),
            Err(Error::DuplicateRequest { original, .. })
                if original.tenant_id == *tenant && original.amount == amount =>
            {
                tracing::warn!(tenant = %tenant, source = %source, "Adopting existing ledger line for credit");
                Ok(*original)
            }
            Err(Error::DuplicateRequest { .. }) => Err(Error::InvalidSourceState {
                source_ref: source.to_string(),
                state: "already credited".to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    pub async fn credits(&self, tenant: &TenantId) -> Result<Vec<CreditEntry>> {
        self.store.list(tenant).await
    }
}
