//! Structured span definitions for tracing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rust_decimal::Decimal;
use tracing::{Level, Span, field, span};

use crate::audit::GuardLayer;
use crate::types::TenantId;

/// Creates correlated spans for one guard instance.
#[derive(Debug)]
pub struct SpanContext {
    service: String,
    request_id: AtomicU64,
}

impl Default for SpanContext {
    fn default() -> Self {
        Self::new("revenue-guard")
    }
}

impl SpanContext {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            request_id: AtomicU64::new(0),
        }
    }

    pub fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn guard_evaluate_span(&self, tenant: &TenantId, action: &str) -> EvaluateSpan {
        let span = span!(
            Level::INFO,
            "guard.evaluate",
            service = %self.service,
            request_id = self.next_request_id(),
            tenant = %tenant,
            action = action,
            allowed = field::Empty,
            blocked_at = field::Empty,
            latency_ms = field::Empty,
        );
        EvaluateSpan {
            span,
            start: Instant::now(),
        }
    }

    pub fn ledger_debit_span(&self, tenant: &TenantId, amount: Decimal) -> Span {
        span!(
            Level::DEBUG,
            "ledger.debit",
            tenant = %tenant,
            amount = %amount,
            entry_id = field::Empty,
        )
    }
}

/// `guard.evaluate` span that records its outcome when finished.
#[derive(Debug)]
pub struct EvaluateSpan {
    span: Span,
    start: Instant,
}

impl EvaluateSpan {
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Records the outcome and returns the elapsed time in milliseconds.
    pub fn finish(self, allowed: bool, blocked_at: Option<GuardLayer>) -> f64 {
        let latency_ms = self.elapsed_ms();
        self.span.record("allowed", allowed);
        if let Some(layer) = blocked_at {
            self.span.record("blocked_at", layer.as_str());
        }
        self.span.record("latency_ms", latency_ms);
        latency_ms
    }
}
