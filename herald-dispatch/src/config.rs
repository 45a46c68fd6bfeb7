//! Dispatch configuration and its environment overrides

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::CircuitBreakerConfig,
    rate_limiter::{RateLimitAlgorithm, RateLimitConfig},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    InvalidValue {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{var}: malformed instance override {entry:?}, expected instance:tps")]
    InvalidOverride { var: &'static str, entry: String },
}

pub const DEFAULT_TPS_VAR: &str = "HERALD_DEFAULT_TPS";
pub const INSTANCE_TPS_VAR: &str = "HERALD_INSTANCE_TPS";
pub const BREAKER_WINDOW_VAR: &str = "HERALD_BREAKER_WINDOW_MS";
pub const BREAKER_COOLDOWN_VAR: &str = "HERALD_BREAKER_COOLDOWN_MS";
pub const BREAKER_THRESHOLD_VAR: &str = "HERALD_BREAKER_THRESHOLD";
pub const ALGORITHM_VAR: &str = "HERALD_RATE_LIMIT_ALGORITHM";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl DispatchConfig {
    /// Defaults with the process environment applied
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Overlay values found through `lookup` onto this configuration
    ///
    /// Unset and blank variables leave the current value alone. An instance
    /// override table from the environment is merged over the configured one.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when a variable is set but malformed.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let read = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        if let Some(value) = read(DEFAULT_TPS_VAR) {
            self.rate_limit.default_tps = parse_number(DEFAULT_TPS_VAR, &value)?;
        }

        if let Some(value) = read(INSTANCE_TPS_VAR) {
            self.rate_limit
                .instance_overrides
                .extend(parse_instance_overrides(INSTANCE_TPS_VAR, &value)?);
        }

        if let Some(value) = read(ALGORITHM_VAR) {
            self.rate_limit.algorithm =
                value
                    .parse::<RateLimitAlgorithm>()
                    .map_err(|_| ConfigError::InvalidValue {
                        var: ALGORITHM_VAR,
                        expected: "fixed_window or token_bucket",
                        value,
                    })?;
        }

        if let Some(value) = read(BREAKER_WINDOW_VAR) {
            self.circuit_breaker.window_ms = parse_number(BREAKER_WINDOW_VAR, &value)?;
        }

        if let Some(value) = read(BREAKER_COOLDOWN_VAR) {
            self.circuit_breaker.cooldown_ms = parse_number(BREAKER_COOLDOWN_VAR, &value)?;
        }

        if let Some(value) = read(BREAKER_THRESHOLD_VAR) {
            self.circuit_breaker.failure_threshold = parse_number(BREAKER_THRESHOLD_VAR, &value)?;
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            expected: "a non-negative integer",
            value: value.to_string(),
        })
}

/// Parse `"foo:11,bar:3"` into an instance → TPS table
///
/// # Errors
///
/// [`ConfigError::InvalidOverride`] for an entry without a colon or with a
/// blank instance, and [`ConfigError::InvalidValue`] for a bad TPS.
pub fn parse_instance_overrides(
    var: &'static str,
    value: &str,
) -> Result<AHashMap<String, u32>, ConfigError> {
    let mut overrides = AHashMap::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((instance, tps)) = entry.split_once(':') else {
            return Err(ConfigError::InvalidOverride {
                var,
                entry: entry.to_string(),
            });
        };

        let instance = instance.trim();
        if instance.is_empty() {
            return Err(ConfigError::InvalidOverride {
                var,
                entry: entry.to_string(),
            });
        }

        overrides.insert(instance.to_string(), parse_number(var, tps)?);
    }

    Ok(overrides)
}
