//! Message lifecycle
//!
//! ```text
//! PENDING ──> SENT ──> DELIVERED ──> READ
//!    │          │
//!    └──────────┴──> FAILED (terminal)
//! ```
//!
//! Transitions only ever move forward along the top row, so an acknowledgement
//! that arrives late can never pull a message back to an earlier state.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    #[default]
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Map a broker's status string onto the lifecycle
    ///
    /// Unrecognised values are treated as `Sent`: the broker accepted the
    /// message but reported something we have no finer state for.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "DELIVERED" => Self::Delivered,
            "READ" | "SEEN" => Self::Read,
            "FAILED" | "ERROR" => Self::Failed,
            "PENDING" => Self::Pending,
            _ => Self::Sent,
        }
    }

    /// Position on the forward path; `Failed` sits outside it
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether moving from `self` to `next` is a strict forward transition
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self.rank(), next.rank()) {
            (None, _) => false,
            (Some(_), None) => matches!(self, Self::Pending | Self::Sent),
            (Some(current), Some(next)) => next > current,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
