//! Provider-agnostic classification of dispatch failures
//!
//! Every failure that ends up on a message, whether raised by a local gate or
//! returned by the broker, is reduced to a [`NormalizedError`] carrying one of
//! the canonical [`ErrorCode`]s plus whatever the broker told us about it.

use std::fmt;

use herald_common::{ErrorCode, tracing};
use serde::{Deserialize, Serialize};

use crate::{circuit_breaker::CircuitOpen, error::TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// The broker's own code, untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
}

impl NormalizedError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            request_id: None,
            provider_code: None,
        }
    }

    #[must_use]
    pub fn circuit_open(open: &CircuitOpen) -> Self {
        Self::new(
            ErrorCode::CircuitOpen,
            format!(
                "circuit open after {} failures, retry after {}",
                open.failure_count,
                open.retry_at.to_rfc3339()
            ),
        )
    }

    #[must_use]
    pub fn rate_limited(limit: u32) -> Self {
        Self::new(
            ErrorCode::RateLimited,
            format!("rate limit of {limit} messages per second exceeded"),
        )
    }

    #[must_use]
    pub fn invalid_recipient() -> Self {
        Self::new(ErrorCode::InvalidRecipient, "contact has no destination address")
    }

    #[must_use]
    pub fn no_instance() -> Self {
        Self::new(ErrorCode::InstanceNotConnected, "no channel instance bound")
    }

    /// The broker accepted the message under an id another message already holds
    #[must_use]
    pub fn external_id_taken(external_id: &str) -> Self {
        Self::new(
            ErrorCode::Unknown,
            format!("broker id {external_id} already belongs to another message"),
        )
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Canonical code for a broker's error code, if it is a known one
fn broker_code(code: &str) -> Option<ErrorCode> {
    match code.trim().to_ascii_uppercase().as_str() {
        "INSTANCE_NOT_CONNECTED"
        | "SESSION_DISCONNECTED"
        | "NOT_CONNECTED"
        | "DISCONNECTED"
        | "SESSION_CLOSED" => Some(ErrorCode::InstanceNotConnected),
        "RATE_LIMITED" | "TOO_MANY_REQUESTS" | "THROTTLED" => Some(ErrorCode::RateLimited),
        "INVALID_RECIPIENT" | "INVALID_NUMBER" | "NUMBER_NOT_ON_WHATSAPP" | "RECIPIENT_NOT_FOUND" => {
            Some(ErrorCode::InvalidRecipient)
        }
        "TIMEOUT" | "REQUEST_TIMEOUT" => Some(ErrorCode::Timeout),
        _ => None,
    }
}

fn http_code(status: u16) -> ErrorCode {
    match status {
        429 => ErrorCode::RateLimited,
        408 | 504 => ErrorCode::Timeout,
        _ => ErrorCode::Unknown,
    }
}

/// Classify a transport failure
#[must_use]
pub fn normalize(err: &TransportError) -> NormalizedError {
    match err {
        TransportError::Broker {
            code,
            message,
            status,
            request_id,
        } => NormalizedError {
            code: broker_code(code)
                .or_else(|| status.map(http_code))
                .unwrap_or(ErrorCode::Unknown),
            message: message.clone(),
            status: *status,
            request_id: request_id.clone(),
            provider_code: Some(code.clone()),
        },
        TransportError::Http {
            status,
            message,
            request_id,
        } => NormalizedError {
            code: http_code(*status),
            message: message.clone(),
            status: Some(*status),
            request_id: request_id.clone(),
            provider_code: None,
        },
        TransportError::Timeout(message) => NormalizedError::new(ErrorCode::Timeout, message.clone()),
        TransportError::Connection(message) | TransportError::Other(message) => {
            NormalizedError::new(ErrorCode::Unknown, message.clone())
        }
    }
}

/// Record the side effects a normalised error carries
pub fn observe(err: &NormalizedError, tenant_id: &str, instance_id: &str) {
    if err.code == ErrorCode::InstanceNotConnected {
        tracing::warn!(
            tenant = tenant_id,
            instance = instance_id,
            "Channel instance is not connected"
        );

        if let Some(metrics) = herald_metrics::try_metrics() {
            metrics
                .dispatch
                .record_instance_not_connected(tenant_id, instance_id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn broker(code: &str, status: Option<u16>) -> TransportError {
        TransportError::Broker {
            code: code.to_string(),
            message: "nope".to_string(),
            status,
            request_id: Some("req-1".to_string()),
        }
    }

    #[test]
    fn test_broker_code_table() {
        assert_eq!(
            normalize(&broker("SESSION_DISCONNECTED", Some(409))).code,
            ErrorCode::InstanceNotConnected
        );
        assert_eq!(normalize(&broker("throttled", None)).code, ErrorCode::RateLimited);
        assert_eq!(
            normalize(&broker("NUMBER_NOT_ON_WHATSAPP", Some(400))).code,
            ErrorCode::InvalidRecipient
        );
        assert_eq!(normalize(&broker("REQUEST_TIMEOUT", None)).code, ErrorCode::Timeout);
    }

    #[test]
    fn test_unknown_broker_code_falls_back_to_status() {
        assert_eq!(normalize(&broker("QUOTA", Some(429))).code, ErrorCode::RateLimited);
        assert_eq!(normalize(&broker("QUOTA", Some(500))).code, ErrorCode::Unknown);
        assert_eq!(normalize(&broker("QUOTA", None)).code, ErrorCode::Unknown);
    }

    #[test]
    fn test_provider_details_are_preserved() {
        let normalized = normalize(&broker("weird_code", Some(502)));
        assert_eq!(
            normalized,
            NormalizedError {
                code: ErrorCode::Unknown,
                message: "nope".to_string(),
                status: Some(502),
                request_id: Some("req-1".to_string()),
                provider_code: Some("weird_code".to_string()),
            }
        );
    }

    #[test]
    fn test_http_and_network_errors() {
        let http = |status| TransportError::Http {
            status,
            message: "err".to_string(),
            request_id: None,
        };

        assert_eq!(normalize(&http(429)).code, ErrorCode::RateLimited);
        assert_eq!(normalize(&http(504)).code, ErrorCode::Timeout);
        assert_eq!(normalize(&http(408)).code, ErrorCode::Timeout);
        assert_eq!(normalize(&http(500)).code, ErrorCode::Unknown);
        assert_eq!(normalize(&http(500)).status, Some(500));

        assert_eq!(
            normalize(&TransportError::Timeout("10s".to_string())).code,
            ErrorCode::Timeout
        );
        assert_eq!(
            normalize(&TransportError::Connection("refused".to_string())).code,
            ErrorCode::Unknown
        );
    }

    #[test]
    fn test_gate_errors() {
        assert_eq!(NormalizedError::rate_limited(3).code, ErrorCode::RateLimited);
        assert_eq!(
            NormalizedError::invalid_recipient().code,
            ErrorCode::InvalidRecipient
        );
        assert_eq!(NormalizedError::no_instance().to_string(), "INSTANCE_NOT_CONNECTED: no channel instance bound");
    }
}
