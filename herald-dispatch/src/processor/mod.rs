//! Dispatch coordination
//!
//! The [`Dispatcher`] ties the ledger, instance resolution, per-channel
//! gating, the transport and reconciliation together into one end-to-end
//! attempt per [`SendRequest`], and applies broker acknowledgements.

pub mod ack;
pub mod send;

use std::sync::Arc;

use herald_common::{Clock, SystemClock};
use herald_ledger::{Directory, Ledger, MessageStore};

pub use self::send::SendRequest;
use crate::{
    circuit_breaker::{BreakerState, CircuitBreaker},
    config::DispatchConfig,
    notify::{NotificationSink, NullSink},
    policy::DispatchPipeline,
    rate_limiter::{RateLimiter, TokenBucket},
    reconciler::Reconciler,
    resolver::InstanceResolver,
    state::{KeyedStore, MemoryKeyedStore},
    transport::Transport,
};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    directory: Arc<dyn Directory>,
    ledger: Ledger,
    resolver: InstanceResolver,
    reconciler: Reconciler,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    breaker_state: Arc<dyn KeyedStore<BreakerState>>,
    counters: Arc<dyn KeyedStore<u64>>,
    buckets: Arc<dyn KeyedStore<TokenBucket>>,
}

impl Dispatcher {
    #[must_use]
    pub fn builder(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            store,
            directory,
            transport,
            config: DispatchConfig::default(),
            clock: None,
            notifier: None,
            breaker_store: None,
            counter_store: None,
            bucket_store: None,
        }
    }

    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Drop expired breaker and limiter state, returning how many entries went
    pub fn purge_expired(&self) -> usize {
        self.breaker_state.purge_expired()
            + self.counters.purge_expired()
            + self.buckets.purge_expired()
    }

    fn pipeline(&self) -> DispatchPipeline<'_> {
        DispatchPipeline::new(
            &self.breaker,
            &self.limiter,
            self.notifier.as_ref(),
            self.clock.as_ref(),
        )
    }
}

/// Assembles a [`Dispatcher`]
///
/// Anything not supplied falls back to in-process defaults: the system clock,
/// a [`NullSink`] and [`MemoryKeyedStore`]s for breaker and limiter state.
#[must_use]
pub struct DispatcherBuilder {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    breaker_store: Option<Arc<dyn KeyedStore<BreakerState>>>,
    counter_store: Option<Arc<dyn KeyedStore<u64>>>,
    bucket_store: Option<Arc<dyn KeyedStore<TokenBucket>>>,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Share breaker state through `store` instead of keeping it in process
    pub fn breaker_store(mut self, store: Arc<dyn KeyedStore<BreakerState>>) -> Self {
        self.breaker_store = Some(store);
        self
    }

    /// Share limiter state through the given stores instead of keeping it in process
    pub fn limiter_stores(
        mut self,
        counters: Arc<dyn KeyedStore<u64>>,
        buckets: Arc<dyn KeyedStore<TokenBucket>>,
    ) -> Self {
        self.counter_store = Some(counters);
        self.bucket_store = Some(buckets);
        self
    }

    pub fn build(self) -> Dispatcher {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let breaker_state = self
            .breaker_store
            .unwrap_or_else(|| Arc::new(MemoryKeyedStore::<BreakerState>::new(clock.clone())));
        let counters = self
            .counter_store
            .unwrap_or_else(|| Arc::new(MemoryKeyedStore::<u64>::new(clock.clone())));
        let buckets = self
            .bucket_store
            .unwrap_or_else(|| Arc::new(MemoryKeyedStore::<TokenBucket>::new(clock.clone())));

        let ledger = Ledger::new(self.store, clock.clone());

        Dispatcher {
            resolver: InstanceResolver::new(self.directory.clone()),
            reconciler: Reconciler::new(ledger.clone(), clock.clone()),
            breaker: CircuitBreaker::new(
                self.config.circuit_breaker,
                breaker_state.clone(),
                clock.clone(),
            ),
            limiter: RateLimiter::new(
                self.config.rate_limit,
                counters.clone(),
                buckets.clone(),
                clock.clone(),
            ),
            directory: self.directory,
            ledger,
            transport: self.transport,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NullSink)),
            clock,
            breaker_state,
            counters,
            buckets,
        }
    }
}
