//! Credit sources and their resolution.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::ledger::EntryKind;
use crate::types::Reference;

/// Business object that justifies a non-usage credit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CreditSource {
    RefundRequest(i64),
    DisputeResolution(i64),
    Migration(String),
    Compensation(i64),
    Promotion(String),
}

impl CreditSource {
    pub fn kind(&self) -> &'static str {
        match self {
            CreditSource::RefundRequest(_) => "refund_request",
            CreditSource::DisputeResolution(_) => "dispute_resolution",
            CreditSource::Migration(_) => "migration",
            CreditSource::Compensation(_) => "compensation",
            CreditSource::Promotion(_) => "promotion",
        }
    }

    pub fn id(&self) -> String {
        match self {
            CreditSource::RefundRequest(id)
            | CreditSource::DisputeResolution(id)
            | CreditSource::Compensation(id) => id.to_string(),
            CreditSource::Migration(id) | CreditSource::Promotion(id) => id.clone(),
        }
    }

    /// Ledger entry kind written for this source.
    pub fn entry_kind(&self) -> EntryKind {
        match self {
            CreditSource::RefundRequest(_) | CreditSource::DisputeResolution(_) => {
                EntryKind::Refund
            }
            CreditSource::Compensation(_) => EntryKind::Adjustment,
            CreditSource::Promotion(_) => EntryKind::Bonus,
            CreditSource::Migration(_) => EntryKind::Topup,
        }
    }

    pub fn reference(&self) -> Reference {
        match self {
            CreditSource::RefundRequest(id) => Reference::RefundRequest(*id),
            CreditSource::DisputeResolution(id) => Reference::Dispute(*id),
            CreditSource::Migration(id) => Reference::Migration(id.clone()),
            CreditSource::Compensation(id) => Reference::Compensation(*id),
            CreditSource::Promotion(code) => Reference::Promotion(code.clone()),
        }
    }

    /// Ledger idempotency key; one credit line per source.
    pub fn idempotency_key(&self) -> String {
        format!("credit:{}:{}", self.kind(), self.id())
    }
}

impl std::fmt::Display for CreditSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind(), self.id())
    }
}

/// State of a credit source as reported by its owning subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Approved,
    Pending,
    Rejected,
    /// Paid out by another channel.
    Settled,
    NotFound,
}

impl SourceState {
    pub fn is_creditable(&self) -> bool {
        matches!(self, SourceState::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Approved => "approved",
            SourceState::Pending => "pending",
            SourceState::Rejected => "rejected",
            SourceState::Settled => "settled",
            SourceState::NotFound => "not_found",
        }
    }
}

/// Looks up the state of each kind of credit source in its owning subsystem.
#[async_trait::async_trait]
pub trait SourceResolver: Send + Sync {
    async fn refund_request(&self, id: i64) -> Result<SourceState>;

    async fn dispute_resolution(&self, id: i64) -> Result<SourceState>;

    async fn migration(&self, batch: &str) -> Result<SourceState>;

    async fn compensation(&self, id: i64) -> Result<SourceState>;

    async fn promotion(&self, code: &str) -> Result<SourceState>;

    async fn resolve(&self, source: &CreditSource) -> Result<SourceState> {
        match source {
            CreditSource::RefundRequest(id) => self.refund_request(*id).await,
            CreditSource::DisputeResolution(id) => self.dispute_resolution(*id).await,
            CreditSource::Migration(batch) => self.migration(batch).await,
            CreditSource::Compensation(id) => self.compensation(*id).await,
            CreditSource::Promotion(code) => self.promotion(code).await,
        }
    }
}

/// Resolver backed by a fixed table; unknown sources are `NotFound`.
#[derive(Debug, Default)]
pub struct StaticSourceResolver {
    states: DashMap<CreditSource, SourceState>,
}

impl StaticSourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, source: CreditSource, state: SourceState) -> Self {
        self.states.insert(source, state);
        self
    }

    pub fn set(&self, source: CreditSource, state: SourceState) {
        self.states.insert(source, state);
    }

    fn lookup(&self, source: CreditSource) -> SourceState {
        self.states
            .get(&source)
            .map(|s| *s.value())
            .unwrap_or(SourceState::NotFound)
    }
}

#[async_trait::async_trait]
impl SourceResolver for StaticSourceResolver {
    async fn refund_request(&self, id: i64) -> Result<SourceState> {
        Ok(self.lookup(CreditSource::RefundRequest(id)))
    }

    async fn dispute_resolution(&self, id: i64) -> Result<SourceState> {
        Ok(self.lookup(CreditSource::DisputeResolution(id)))
    }

    async fn migration(&self, batch: &str) -> Result<SourceState> {
        Ok(self.lookup(CreditSource::Migration(batch.to_string())))
    }

    async fn compensation(&self, id: i64) -> Result<SourceState> {
        Ok(self.lookup(CreditSource::Compensation(id)))
    }

    async fn promotion(&self, code: &str) -> Result<SourceState> {
        Ok(self.lookup(CreditSource::Promotion(code.to_string())))
    }
}
