//! Structured tracing spans and in-process metrics for the guard pipeline.
//!
//! Logs go through `tracing`; install any subscriber to collect them. The
//! [`MetricsRegistry`] is shared with the guard through an `Arc` and can be
//! read at any time via [`MetricsSummary::from_registry`].

mod metrics;
mod spans;

pub use metrics::{Counter, Gauge, Histogram, MetricsRegistry, MetricsSummary};
pub use spans::{EvaluateSpan, SpanContext};
