//! Per-channel throughput limiting
//!
//! Each `tenant:instance` key is limited to the TPS resolved for its instance:
//! an entry in the override table, else the global default.
//!
//! Two algorithms are available:
//!
//! - **Fixed window** (default): a counter per key and wall-clock second. A
//!   call is admitted iff the post-increment count is within the limit; the
//!   next second starts from zero.
//! - **Token bucket**: capacity equal to the TPS, refilled at TPS tokens per
//!   second. Admits the same steady-state rate with bursts bounded by the
//!   capacity.
//!
//! ```text
//! Limit: 3 TPS, fixed window
//! t=0.1s  acquire → 1 ✓
//! t=0.2s  acquire → 2 ✓
//! t=0.5s  acquire → 3 ✓
//! t=0.9s  acquire → 4 ✗ (rate limited)
//! t=1.0s  acquire → 1 ✓ (new window)
//! ```

use std::{sync::Arc, time::Duration};

use herald_common::Clock;
use herald_tracing::traced;
use serde::{Deserialize, Serialize};

use crate::state::{CounterExt, KeyedStore, channel_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    FixedWindow,
    TokenBucket,
}

impl std::str::FromStr for RateLimitAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_window" | "fixed-window" | "window" => Ok(Self::FixedWindow),
            "token_bucket" | "token-bucket" | "bucket" => Ok(Self::TokenBucket),
            other => Err(format!("unknown rate limit algorithm {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Messages per second per instance when no override applies
    #[serde(default = "default_tps")]
    pub default_tps: u32,

    /// Per-instance TPS, keyed by instance id
    #[serde(default)]
    pub instance_overrides: ahash::AHashMap<String, u32>,

    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_tps: default_tps(),
            instance_overrides: ahash::AHashMap::default(),
            algorithm: RateLimitAlgorithm::default(),
        }
    }
}

const fn default_tps() -> u32 {
    5
}

/// Token bucket for a single key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    tokens: f64,
    /// Epoch millis of the last refill
    last_refill: i64,
}

impl TokenBucket {
    /// A full bucket
    const fn full(capacity: f64, now: i64) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Add the tokens earned since the last refill, capped at `capacity`
    #[allow(clippy::cast_precision_loss)]
    fn refill(&mut self, capacity: f64, now: i64) {
        let elapsed = (now.saturating_sub(self.last_refill)).max(0) as f64 / 1_000.0;
        self.tokens = elapsed.mul_add(capacity, self.tokens).min(capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStats {
    pub algorithm: RateLimitAlgorithm,
    pub limit: u32,
    /// Calls that would still be admitted right now
    pub remaining: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    counters: Arc<dyn KeyedStore<u64>>,
    buckets: Arc<dyn KeyedStore<TokenBucket>>,
    clock: Arc<dyn Clock>,
}

/// Window counters outlive their second briefly so a late reader still sees them
const WINDOW_TTL: Duration = Duration::from_secs(2);

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        counters: Arc<dyn KeyedStore<u64>>,
        buckets: Arc<dyn KeyedStore<TokenBucket>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            counters,
            buckets,
            clock,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Limiter key for a channel instance
    #[must_use]
    pub fn key(tenant_id: &str, instance_id: &str) -> String {
        channel_key(tenant_id, instance_id)
    }

    /// TPS for `instance_id`: the override if configured, else the default
    #[must_use]
    pub fn limit_for(&self, instance_id: &str) -> u32 {
        self.config
            .instance_overrides
            .get(instance_id)
            .copied()
            .unwrap_or(self.config.default_tps)
    }

    fn window_key(key: &str, now: i64) -> String {
        format!("{key}@{}", now.div_euclid(1_000))
    }

    /// Take one unit of budget for `key`, limited by `instance_id`'s TPS
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "us"))]
    pub fn try_acquire(&self, key: &str, instance_id: &str) -> bool {
        let limit = self.limit_for(instance_id);
        let now = self.clock.now_ms();

        let admitted = match self.config.algorithm {
            RateLimitAlgorithm::FixedWindow => {
                let count = self
                    .counters
                    .increment(&Self::window_key(key, now), Some(WINDOW_TTL));
                count <= u64::from(limit)
            }
            RateLimitAlgorithm::TokenBucket => {
                let capacity = f64::from(limit);
                let mut admitted = false;
                self.buckets.update(key, None, &mut |current| {
                    let mut bucket = current.unwrap_or_else(|| TokenBucket::full(capacity, now));
                    bucket.refill(capacity, now);
                    admitted = bucket.try_consume();
                    bucket
                });
                admitted
            }
        };

        if !admitted {
            tracing::debug!(key, limit, "Rate limit exceeded");
        }

        admitted
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn stats(&self, key: &str, instance_id: &str) -> RateLimitStats {
        let limit = self.limit_for(instance_id);
        let now = self.clock.now_ms();

        let remaining = match self.config.algorithm {
            RateLimitAlgorithm::FixedWindow => {
                let used = self
                    .counters
                    .get(&Self::window_key(key, now))
                    .unwrap_or(0);
                u32::try_from(u64::from(limit).saturating_sub(used)).unwrap_or(0)
            }
            RateLimitAlgorithm::TokenBucket => {
                let capacity = f64::from(limit);
                let mut bucket = self
                    .buckets
                    .get(key)
                    .unwrap_or_else(|| TokenBucket::full(capacity, now));
                bucket.refill(capacity, now);
                bucket.tokens.floor().max(0.0) as u32
            }
        };

        RateLimitStats {
            algorithm: self.config.algorithm,
            limit,
            remaining,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use herald_common::ManualClock;

    use super::*;
    use crate::state::MemoryKeyedStore;

    fn limiter(config: RateLimitConfig) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::epoch());
        let limiter = RateLimiter::new(
            config,
            Arc::new(MemoryKeyedStore::<u64>::new(clock.clone())),
            Arc::new(MemoryKeyedStore::<TokenBucket>::new(clock.clone())),
            clock.clone(),
        );
        (clock, limiter)
    }

    fn overrides(pairs: &[(&str, u32)]) -> RateLimitConfig {
        RateLimitConfig {
            instance_overrides: pairs
                .iter()
                .map(|(instance, tps)| ((*instance).to_string(), *tps))
                .collect(),
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn test_limit_for_resolution() {
        let (_, limiter) = limiter(overrides(&[("foo", 11), ("bar", 3)]));

        assert_eq!(limiter.limit_for("foo"), 11);
        assert_eq!(limiter.limit_for("bar"), 3);
        assert_eq!(limiter.limit_for("baz"), 5);
    }

    #[test]
    fn test_fixed_window_ceiling() {
        let (_, limiter) = limiter(overrides(&[("wa-1", 3)]));
        let key = RateLimiter::key("acme", "wa-1");

        for _ in 0..3 {
            assert!(limiter.try_acquire(&key, "wa-1"));
        }
        assert!(!limiter.try_acquire(&key, "wa-1"));
        assert_eq!(limiter.stats(&key, "wa-1").remaining, 0);
    }

    #[test]
    fn test_new_window_starts_from_zero() {
        let (clock, limiter) = limiter(overrides(&[("wa-1", 2)]));
        let key = RateLimiter::key("acme", "wa-1");

        assert!(limiter.try_acquire(&key, "wa-1"));
        assert!(limiter.try_acquire(&key, "wa-1"));
        assert!(!limiter.try_acquire(&key, "wa-1"));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_acquire(&key, "wa-1"));
        assert_eq!(limiter.stats(&key, "wa-1").remaining, 1);
    }

    #[test]
    fn test_instances_are_independent() {
        let (_, limiter) = limiter(overrides(&[("wa-1", 1), ("wa-2", 1)]));
        let first = RateLimiter::key("acme", "wa-1");
        let second = RateLimiter::key("acme", "wa-2");

        assert!(limiter.try_acquire(&first, "wa-1"));
        assert!(!limiter.try_acquire(&first, "wa-1"));
        assert!(limiter.try_acquire(&second, "wa-2"));
    }

    #[test]
    fn test_token_bucket_burst_and_refill() {
        let (clock, limiter) = limiter(RateLimitConfig {
            default_tps: 4,
            algorithm: RateLimitAlgorithm::TokenBucket,
            ..RateLimitConfig::default()
        });
        let key = RateLimiter::key("acme", "wa-1");

        for _ in 0..4 {
            assert!(limiter.try_acquire(&key, "wa-1"));
        }
        assert!(!limiter.try_acquire(&key, "wa-1"));

        clock.advance(Duration::from_millis(500));
        assert_eq!(limiter.stats(&key, "wa-1").remaining, 2);
        assert!(limiter.try_acquire(&key, "wa-1"));
        assert!(limiter.try_acquire(&key, "wa-1"));
        assert!(!limiter.try_acquire(&key, "wa-1"));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "token_bucket".parse::<RateLimitAlgorithm>(),
            Ok(RateLimitAlgorithm::TokenBucket)
        );
        assert_eq!(
            " Fixed_Window ".parse::<RateLimitAlgorithm>(),
            Ok(RateLimitAlgorithm::FixedWindow)
        );
        assert!("leaky".parse::<RateLimitAlgorithm>().is_err());
    }
}
