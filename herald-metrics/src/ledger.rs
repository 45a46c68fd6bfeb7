//! Ledger metrics

use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

use crate::MetricsError;

#[derive(Debug)]
pub struct LedgerMetrics {
    /// Creations that resolved to an existing record
    duplicates_total: Counter<u64>,

    /// Records created
    created_total: Counter<u64>,

    duplicates: AtomicU64,
    created: AtomicU64,
}

impl LedgerMetrics {
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let duplicates_total = meter
            .u64_counter("herald.ledger.duplicates.total")
            .with_description("Creations resolved to an existing message")
            .build();

        let created_total = meter
            .u64_counter("herald.ledger.created.total")
            .with_description("Messages recorded")
            .build();

        Ok(Self {
            duplicates_total,
            created_total,
            duplicates: AtomicU64::new(0),
            created: AtomicU64::new(0),
        })
    }

    pub fn record_created(&self, tenant: &str) {
        self.created_total
            .add(1, &[KeyValue::new("tenant", tenant.to_string())]);
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self, tenant: &str) {
        self.duplicates_total
            .add(1, &[KeyValue::new("tenant", tenant.to_string())]);
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("herald.ledger")
}
