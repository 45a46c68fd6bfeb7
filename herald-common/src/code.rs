use std::fmt;

use serde::{Deserialize, Serialize};

/// Provider-agnostic classification of a dispatch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The channel instance's session is down
    InstanceNotConnected,
    RateLimited,
    InvalidRecipient,
    CircuitOpen,
    Timeout,
    Unknown,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InstanceNotConnected => "INSTANCE_NOT_CONNECTED",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidRecipient => "INVALID_RECIPIENT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Codes describing the channel rather than the individual message
    #[must_use]
    pub const fn is_unavailable(self) -> bool {
        matches!(
            self,
            Self::InstanceNotConnected | Self::RateLimited | Self::CircuitOpen
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
