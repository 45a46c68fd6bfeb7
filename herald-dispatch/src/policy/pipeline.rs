//! Dispatch gating stages
//!
//! ## Stages
//!
//! 1. **Circuit breaker**: fail fast while the channel is known to be failing
//! 2. **Rate limiting**: cap messages per second per channel instance
//! 3. *(transport call, made by the caller)*
//! 4. **Outcome**: success or failure fed back into the breaker, with
//!    notifications on every open/close transition
//!
//! The breaker gate runs first so an open channel never consumes limiter
//! budget.

use herald_common::{Clock, InstanceId, TenantId, tracing};
use herald_tracing::traced;

use crate::{
    circuit_breaker::{Admission, CircuitBreaker},
    normalizer::NormalizedError,
    notify::{Notification, NotificationSink},
    rate_limiter::RateLimiter,
    state::channel_key,
};

pub struct DispatchPipeline<'a> {
    breaker: &'a CircuitBreaker,
    limiter: &'a RateLimiter,
    notifier: &'a dyn NotificationSink,
    clock: &'a dyn Clock,
}

impl<'a> DispatchPipeline<'a> {
    #[must_use]
    pub const fn new(
        breaker: &'a CircuitBreaker,
        limiter: &'a RateLimiter,
        notifier: &'a dyn NotificationSink,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            breaker,
            limiter,
            notifier,
            clock,
        }
    }

    /// Stage 1: breaker gate
    ///
    /// # Errors
    ///
    /// A `CIRCUIT_OPEN` error while the breaker rejects calls.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(tenant = %tenant_id, instance = %instance_id)), timing(precision = "us"))]
    pub fn check_circuit(
        &self,
        tenant_id: &TenantId,
        instance_id: &InstanceId,
    ) -> Result<Admission, NormalizedError> {
        let key = channel_key(tenant_id.as_str(), instance_id.as_str());

        self.breaker.assert_closed(&key).map_err(|open| {
            tracing::info!(
                tenant = %tenant_id,
                instance = %instance_id,
                retry_at = %open.retry_at,
                "Circuit open, failing dispatch fast"
            );
            NormalizedError::circuit_open(&open)
        })
    }

    /// Stage 2: limiter gate
    ///
    /// A rejected trial call hands its trial back to the breaker so the next
    /// caller can take it.
    ///
    /// # Errors
    ///
    /// A `RATE_LIMITED` error when the instance's budget for this second is spent.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(tenant = %tenant_id, instance = %instance_id)), timing(precision = "us"))]
    pub fn check_rate_limit(
        &self,
        tenant_id: &TenantId,
        instance_id: &InstanceId,
        admission: Admission,
    ) -> Result<(), NormalizedError> {
        let key = RateLimiter::key(tenant_id.as_str(), instance_id.as_str());

        if self.limiter.try_acquire(&key, instance_id.as_str()) {
            return Ok(());
        }

        if admission == Admission::Trial {
            self.breaker.release_trial(&key);
        }

        if let Some(metrics) = herald_metrics::try_metrics() {
            metrics
                .dispatch
                .record_rate_limited(tenant_id.as_str(), instance_id.as_str());
        }

        let limit = self.limiter.limit_for(instance_id.as_str());
        tracing::info!(
            tenant = %tenant_id,
            instance = %instance_id,
            limit,
            "Rate limit exceeded, dispatch rejected"
        );

        Err(NormalizedError::rate_limited(limit))
    }

    /// Stage 4: successful transport call
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(tenant = %tenant_id, instance = %instance_id)), timing(precision = "us"))]
    pub fn record_success(&self, tenant_id: &TenantId, instance_id: &InstanceId) {
        let key = channel_key(tenant_id.as_str(), instance_id.as_str());

        if !self.breaker.record_success(&key) {
            return;
        }

        if let Some(metrics) = herald_metrics::try_metrics() {
            metrics.dispatch.record_circuit_transition(
                tenant_id.as_str(),
                instance_id.as_str(),
                "closed",
            );
        }

        self.notifier.notify(Notification::CircuitClosed {
            tenant_id: tenant_id.clone(),
            instance_id: instance_id.clone(),
            timestamp: self.clock.now(),
        });
    }

    /// Stage 4: failed transport call
    ///
    /// Every transport failure counts toward the breaker, whatever its code.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(tenant = %tenant_id, instance = %instance_id)), timing(precision = "us"))]
    pub fn record_failure(&self, tenant_id: &TenantId, instance_id: &InstanceId) {
        let key = channel_key(tenant_id.as_str(), instance_id.as_str());
        let outcome = self.breaker.record_failure(&key);

        if !outcome.opened {
            return;
        }

        if let Some(metrics) = herald_metrics::try_metrics() {
            metrics.dispatch.record_circuit_transition(
                tenant_id.as_str(),
                instance_id.as_str(),
                "open",
            );
        }

        let config = self.breaker.config();
        self.notifier.notify(Notification::CircuitOpened {
            tenant_id: tenant_id.clone(),
            instance_id: instance_id.clone(),
            failure_count: outcome.failure_count,
            window_ms: config.window_ms,
            cooldown_ms: config.cooldown_ms,
            retry_at: outcome.retry_at,
        });
    }
}
