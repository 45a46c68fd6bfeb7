//! Verifies that the local mirrors of each counter track recorded events
#![allow(clippy::expect_used, clippy::unwrap_used)]

use herald_metrics::{DispatchMetrics, LedgerMetrics, MetricsConfig};

#[test]
fn test_attempt_outcomes_are_counted() {
    let metrics = DispatchMetrics::new().expect("Failed to create dispatch metrics");

    metrics.record_attempt("acme", "wa-1", "sent", 0.12);
    metrics.record_attempt("acme", "wa-1", "failed", 0.40);
    metrics.record_attempt("globex", "wa-9", "sent", 0.05);

    assert_eq!(metrics.attempts(), 3);
    assert_eq!(metrics.failures(), 1);
}

#[test]
fn test_unavailability_counters() {
    let metrics = DispatchMetrics::new().expect("Failed to create dispatch metrics");

    metrics.record_rate_limited("acme", "wa-1");
    metrics.record_rate_limited("acme", "wa-1");
    metrics.record_instance_not_connected("acme", "wa-1");

    assert_eq!(metrics.rate_limited(), 2);
    assert_eq!(metrics.instance_not_connected(), 1);
}

#[test]
fn test_only_open_transitions_count_as_openings() {
    let metrics = DispatchMetrics::new().expect("Failed to create dispatch metrics");

    metrics.record_circuit_transition("acme", "wa-1", "open");
    metrics.record_circuit_transition("acme", "wa-1", "half_open");
    metrics.record_circuit_transition("acme", "wa-1", "closed");
    metrics.record_circuit_transition("acme", "wa-1", "open");

    assert_eq!(metrics.circuit_opened(), 2);
}

#[test]
fn test_ledger_counters() {
    let metrics = LedgerMetrics::new().expect("Failed to create ledger metrics");

    metrics.record_created("acme");
    metrics.record_duplicate("acme");
    metrics.record_duplicate("acme");

    assert_eq!(metrics.created(), 1);
    assert_eq!(metrics.duplicates(), 2);
}

#[test]
fn test_metrics_disabled_by_default() {
    let config = MetricsConfig::default();
    assert!(!config.enabled);

    herald_metrics::init_metrics(&config).expect("disabled init is a no-op");
    assert!(!herald_metrics::is_enabled());
    assert!(herald_metrics::try_metrics().is_none());
}
