//! In-process guard metrics backed by atomics.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use rust_decimal::Decimal;

use crate::audit::GuardLayer;
use crate::types::money::{MICRO_SCALE_FACTOR, to_micros};

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe atomic gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Fixed-bucket histogram; the sum is stored scaled by 1000.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    bounds: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: Vec<f64>) -> Self {
        Self {
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            bounds,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn default_latency() -> Self {
        Self::new(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0])
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    pub fn sum_ms(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Counters for the guard pipeline.
#[derive(Debug)]
pub struct MetricsRegistry {
    pub evaluations_total: Counter,
    pub allowed_total: Counter,
    blocked_by_layer: [Counter; GuardLayer::COUNT],
    pub replays_total: Counter,
    pub notification_failures: Counter,
    pub debited_micros: Counter,
    pub in_flight: Gauge,
    pub evaluate_latency_ms: Histogram,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            evaluations_total: Counter::new(),
            allowed_total: Counter::new(),
            blocked_by_layer: Default::default(),
            replays_total: Counter::new(),
            notification_failures: Counter::new(),
            debited_micros: Counter::new(),
            in_flight: Gauge::new(),
            evaluate_latency_ms: Histogram::default_latency(),
        }
    }

    pub fn record_evaluation_start(&self) {
        self.evaluations_total.inc();
        self.in_flight.inc();
    }

    pub fn record_evaluation_end(&self, latency_ms: f64) {
        self.in_flight.dec();
        self.evaluate_latency_ms.observe(latency_ms);
    }

    pub fn record_allowed(&self, debited: Decimal) {
        self.allowed_total.inc();
        self.debited_micros.add(to_micros(debited));
    }

    pub fn record_blocked(&self, layer: GuardLayer) {
        self.blocked_by_layer[layer.ordinal()].inc();
    }

    pub fn record_replay(&self) {
        self.replays_total.inc();
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.inc();
    }

    pub fn blocked(&self, layer: GuardLayer) -> u64 {
        self.blocked_by_layer[layer.ordinal()].get()
    }

    pub fn blocked_total(&self) -> u64 {
        self.blocked_by_layer.iter().map(Counter::get).sum()
    }

    pub fn total_debited(&self) -> Decimal {
        Decimal::from(self.debited_micros.get()) / MICRO_SCALE_FACTOR
    }
}

/// Point-in-time snapshot for export or display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub evaluations: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub replays: u64,
    pub notification_failures: u64,
    pub total_debited: Decimal,
    pub avg_latency_ms: f64,
}

impl MetricsSummary {
    pub fn from_registry(registry: &MetricsRegistry) -> Self {
        let count = registry.evaluate_latency_ms.count();
        let avg_latency_ms = if count > 0 {
            registry.evaluate_latency_ms.sum_ms() / count as f64
        } else {
            0.0
        };
        Self {
            evaluations: registry.evaluations_total.get(),
            allowed: registry.allowed_total.get(),
            blocked: registry.blocked_total(),
            replays: registry.replays_total.get(),
            notification_failures: registry.notification_failures.get(),
            total_debited: registry.total_debited(),
            avg_latency_ms,
        }
    }
}
