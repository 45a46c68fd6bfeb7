//! Dispatch metrics
//!
//! Tracks outbound dispatch including:
//! - Broker calls by outcome
//! - Rate limit rejections and disconnected-instance failures
//! - Circuit breaker state transitions
//! - Broker call latency

use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

use crate::MetricsError;

#[derive(Debug)]
pub struct DispatchMetrics {
    /// Broker calls by tenant, instance and outcome
    attempts_total: Counter<u64>,

    /// Requests rejected by the per-instance rate limiter
    rate_limited_total: Counter<u64>,

    /// Failures whose normalised code is `INSTANCE_NOT_CONNECTED`
    instance_not_connected_total: Counter<u64>,

    /// Breaker transitions by target state
    circuit_transitions_total: Counter<u64>,

    /// Broker call latency
    duration_seconds: Histogram<f64>,

    attempts: AtomicU64,
    failures: AtomicU64,
    rate_limited: AtomicU64,
    instance_not_connected: AtomicU64,
    circuit_opened: AtomicU64,
}

impl DispatchMetrics {
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let attempts_total = meter
            .u64_counter("herald.dispatch.attempts.total")
            .with_description("Broker calls by tenant, instance and outcome")
            .build();

        let rate_limited_total = meter
            .u64_counter("herald.dispatch.rate_limited.total")
            .with_description("Sends rejected by the per-instance rate limiter")
            .build();

        let instance_not_connected_total = meter
            .u64_counter("herald.dispatch.instance_not_connected.total")
            .with_description("Sends that failed because the instance session was down")
            .build();

        let circuit_transitions_total = meter
            .u64_counter("herald.dispatch.circuit.transitions.total")
            .with_description("Circuit breaker state transitions")
            .build();

        let duration_seconds = meter
            .f64_histogram("herald.dispatch.duration.seconds")
            .with_description("Broker call latency")
            .build();

        Ok(Self {
            attempts_total,
            rate_limited_total,
            instance_not_connected_total,
            circuit_transitions_total,
            duration_seconds,
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            instance_not_connected: AtomicU64::new(0),
            circuit_opened: AtomicU64::new(0),
        })
    }

    /// Record a completed broker call; `outcome` is `"sent"` or `"failed"`
    pub fn record_attempt(&self, tenant: &str, instance: &str, outcome: &str, duration_secs: f64) {
        let attributes = [
            KeyValue::new("tenant", tenant.to_string()),
            KeyValue::new("instance", instance.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.attempts_total.add(1, &attributes);
        self.duration_seconds
            .record(duration_secs, &[KeyValue::new("instance", instance.to_string())]);

        self.attempts.fetch_add(1, Ordering::Relaxed);
        if outcome != "sent" {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rate_limited(&self, tenant: &str, instance: &str) {
        let attributes = [
            KeyValue::new("tenant", tenant.to_string()),
            KeyValue::new("instance", instance.to_string()),
        ];
        self.rate_limited_total.add(1, &attributes);
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_instance_not_connected(&self, tenant: &str, instance: &str) {
        let attributes = [
            KeyValue::new("tenant", tenant.to_string()),
            KeyValue::new("instance", instance.to_string()),
        ];
        self.instance_not_connected_total.add(1, &attributes);
        self.instance_not_connected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a breaker transition; `state` is `"open"` or `"closed"`
    pub fn record_circuit_transition(&self, tenant: &str, instance: &str, state: &str) {
        let attributes = [
            KeyValue::new("tenant", tenant.to_string()),
            KeyValue::new("instance", instance.to_string()),
            KeyValue::new("state", state.to_string()),
        ];
        self.circuit_transitions_total.add(1, &attributes);
        if state == "open" {
            self.circuit_opened.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn instance_not_connected(&self) -> u64 {
        self.instance_not_connected.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn circuit_opened(&self) -> u64 {
        self.circuit_opened.load(Ordering::Relaxed)
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("herald.dispatch")
}
