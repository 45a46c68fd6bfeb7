//! Per-channel circuit breaker
//!
//! Protects a failing channel instance from being hammered by repeated
//! dispatch attempts while still recovering on its own once the broker is
//! healthy again.
//!
//! ```text
//! ┌─────────┐  threshold reached in window  ┌──────┐
//! │ Closed  │ ────────────────────────────> │ Open │ <──┐
//! └─────────┘                               └──────┘    │ trial failed
//!     ^                                        │        │ (re-armed)
//!     │         trial succeeded                │ now >= retry_at
//!     └────────────────────────────────────────┴────────┘
//! ```
//!
//! While open, [`CircuitBreaker::assert_closed`] fails fast until `retry_at`.
//! After that exactly one caller is let through as a trial per cooldown
//! period; the breaker stays open until that trial reports back. Claiming the
//! trial pushes `retry_at` out by another cooldown, so a trial that never
//! reports back lapses and the following cooldown offers a fresh one.
//!
//! ```text
//! Threshold: 3 failures in 60 seconds
//! Cooldown: 30 seconds
//!
//! t=0s:   Closed
//! t=2s:   third failure → Open, retry_at = t+32s
//! t=7s:   rejected (fail fast, counters untouched)
//! t=33s:  trial allowed, retry_at = t+63s; a concurrent caller is still rejected
//! t=34s:  trial succeeds → Closed, failure_count = 0
//! ```

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use herald_common::{Clock, tracing};
use herald_tracing::traced;
use serde::{Deserialize, Serialize};

use crate::state::KeyedStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures inside one window that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Length of the failure-counting window, starting at its first failure
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// How long an open breaker rejects calls before allowing a trial
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_ms: default_window_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_window_ms() -> u64 {
    60_000
}

const fn default_cooldown_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
}

impl CircuitState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

/// Stored state for one `tenant:instance` key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Start of the current failure window (epoch millis)
    pub window_started_at: Option<i64>,
    /// End of the cooldown (epoch millis), set while open
    pub retry_at: Option<i64>,
    /// Set while a trial is out: the `retry_at` in force when it was claimed
    pub trial_claimed: Option<i64>,
}

/// Why [`CircuitBreaker::assert_closed`] rejected a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpen {
    pub failure_count: u32,
    pub retry_at: DateTime<Utc>,
}

/// How [`CircuitBreaker::assert_closed`] let a call through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Closed,
    /// The single trial of the current cooldown period
    Trial,
}

/// Result of [`CircuitBreaker::record_failure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureOutcome {
    /// This failure opened the breaker, or re-opened it after a failed trial
    pub opened: bool,
    pub failure_count: u32,
    pub retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub retry_at: Option<DateTime<Utc>>,
    /// Open, cooled down, and no trial handed out yet
    pub trial_available: bool,
}

fn to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    store: Arc<dyn KeyedStore<BreakerState>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(
        config: CircuitBreakerConfig,
        store: Arc<dyn KeyedStore<BreakerState>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn cooldown_ms(&self) -> i64 {
        i64::try_from(self.config.cooldown_ms).unwrap_or(i64::MAX)
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.window_ms).unwrap_or(i64::MAX)
    }

    /// Gate a call on `key`
    ///
    /// Closed breakers admit every call. An open breaker rejects calls until
    /// `retry_at`, then admits exactly one trial and keeps rejecting until the
    /// trial reports back through [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure), or until one more cooldown
    /// has passed without a report. Failure counters are never touched here.
    ///
    /// # Errors
    ///
    /// [`CircuitOpen`] when the call must fail fast.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "us"))]
    pub fn assert_closed(&self, key: &str) -> Result<Admission, CircuitOpen> {
        if self
            .store
            .get(key)
            .is_none_or(|breaker| breaker.state == CircuitState::Closed)
        {
            return Ok(Admission::Closed);
        }

        let now = self.clock.now_ms();
        let cooldown = self.cooldown_ms();
        let mut verdict = Ok(Admission::Closed);

        self.store.update(key, None, &mut |current| {
            let mut breaker = current.unwrap_or_default();
            verdict = match (breaker.state, breaker.retry_at) {
                (CircuitState::Closed, _) | (CircuitState::Open, None) => Ok(Admission::Closed),
                (CircuitState::Open, Some(retry_at)) if now < retry_at => Err(CircuitOpen {
                    failure_count: breaker.failure_count,
                    retry_at: to_datetime(retry_at),
                }),
                (CircuitState::Open, Some(retry_at)) => {
                    breaker.trial_claimed = Some(retry_at);
                    breaker.retry_at = Some(now.saturating_add(cooldown));
                    Ok(Admission::Trial)
                }
            };
            breaker
        });

        if let Ok(Admission::Trial) = verdict {
            tracing::info!(key, "Circuit breaker allowing trial call after cooldown");
        }

        verdict
    }

    /// Hand back an unused trial so the next caller may take it
    ///
    /// Used when a call admitted as a trial is stopped before reaching the
    /// broker and therefore has no outcome to report.
    pub fn release_trial(&self, key: &str) {
        self.store.update(key, None, &mut |current| {
            let mut breaker = current.unwrap_or_default();
            if let Some(claimed) = breaker.trial_claimed.take() {
                breaker.retry_at = Some(claimed);
            }
            breaker
        });
    }

    /// Count a failed call
    ///
    /// A failure outside the current window starts a new one. Reaching the
    /// threshold opens the breaker with `retry_at = now + cooldown`. A failure
    /// while a trial is out, or once the cooldown has elapsed, is a failed
    /// trial and re-arms the cooldown.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "us"))]
    pub fn record_failure(&self, key: &str) -> FailureOutcome {
        let now = self.clock.now_ms();
        let threshold = self.config.failure_threshold.max(1);
        let window = self.window_ms();
        let cooldown = self.cooldown_ms();
        let mut opened = false;

        let breaker = self.store.update(key, None, &mut |current| {
            let mut breaker = current.unwrap_or_default();
            opened = false;

            match breaker.state {
                CircuitState::Closed => {
                    let expired = breaker
                        .window_started_at
                        .is_none_or(|started| now.saturating_sub(started) >= window);
                    if expired {
                        breaker.failure_count = 0;
                        breaker.window_started_at = Some(now);
                    }

                    breaker.failure_count = breaker.failure_count.saturating_add(1);

                    if breaker.failure_count >= threshold {
                        breaker.state = CircuitState::Open;
                        breaker.retry_at = Some(now.saturating_add(cooldown));
                        breaker.trial_claimed = None;
                        opened = true;
                    }
                }
                CircuitState::Open => {
                    breaker.failure_count = breaker.failure_count.saturating_add(1);

                    let trial = breaker.trial_claimed.is_some()
                        || breaker.retry_at.is_none_or(|retry_at| now >= retry_at);
                    if trial {
                        breaker.retry_at = Some(now.saturating_add(cooldown));
                        breaker.trial_claimed = None;
                        opened = true;
                    }
                }
            }

            breaker
        });

        if opened {
            tracing::warn!(
                key,
                failure_count = breaker.failure_count,
                threshold,
                cooldown_ms = self.config.cooldown_ms,
                "Circuit breaker OPENED - rejecting dispatches until cooldown elapses"
            );
        }

        FailureOutcome {
            opened,
            failure_count: breaker.failure_count,
            retry_at: breaker.retry_at.map(to_datetime),
        }
    }

    /// Count a successful call; returns `true` when this closed an open breaker
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "us"))]
    pub fn record_success(&self, key: &str) -> bool {
        let mut was_open = false;

        self.store.update(key, None, &mut |current| {
            was_open = current.is_some_and(|breaker| breaker.state == CircuitState::Open);
            BreakerState::default()
        });

        if was_open {
            tracing::info!(key, "Circuit breaker CLOSED - normal operation resumed");
        }

        was_open
    }

    #[must_use]
    pub fn stats(&self, key: &str) -> CircuitBreakerStats {
        let breaker = self.store.get(key).unwrap_or_default();
        let now = self.clock.now_ms();

        let trial_available = breaker.state == CircuitState::Open
            && breaker.retry_at.is_some_and(|retry_at| now >= retry_at);

        CircuitBreakerStats {
            state: breaker.state,
            failure_count: breaker.failure_count,
            retry_at: breaker.retry_at.map(to_datetime),
            trial_available,
        }
    }
}
