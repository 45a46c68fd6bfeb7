use herald_common::{ErrorCode, Message};
use herald_ledger::LedgerError;

use crate::normalizer::NormalizedError;

/// Failure reported by a [`Transport`](crate::Transport), classified once at
/// the boundary
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    /// Non-2xx response without a provider error code
    #[error("broker responded with HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        request_id: Option<String>,
    },

    /// The broker reported a provider-specific error code
    #[error("broker error {code}: {message}")]
    Broker {
        code: String,
        message: String,
        status: Option<u16>,
        request_id: Option<String>,
    },

    #[error("connection to broker failed: {0}")]
    Connection(String),

    #[error("broker request timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification callers map onto their own error surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    ServiceUnavailable,
    Conflict,
    TransportFailure,
    Storage,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Conflict => "conflict",
            Self::TransportFailure => "transport_failure",
            Self::Storage => "storage",
        }
    }
}

/// A dispatch attempt that was recorded as failed
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    /// The persisted record, already marked failed
    pub message: Message,
    pub error: NormalizedError,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid request: {0}")]
    Validation(String),

    /// Raised before any side effect, e.g. a disallowed instance override
    #[error("{0}")]
    Unavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("dispatch of message {} failed: {}", .0.message.id, .0.error)]
    Attempt(Box<FailedAttempt>),
}

impl DispatchError {
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn attempt(message: Message, error: NormalizedError) -> Self {
        Self::Attempt(Box::new(FailedAttempt { message, error }))
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unavailable(_) => ErrorKind::ServiceUnavailable,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Attempt(attempt) => match attempt.error.code {
                code if code.is_unavailable() => ErrorKind::ServiceUnavailable,
                ErrorCode::InvalidRecipient => ErrorKind::Validation,
                _ => ErrorKind::TransportFailure,
            },
        }
    }

    /// The failed record, when the error came out of a dispatch attempt
    #[must_use]
    pub fn failed_message(&self) -> Option<&Message> {
        match self {
            Self::Attempt(attempt) => Some(&attempt.message),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Attempt(attempt) => Some(attempt.error.code),
            _ => None,
        }
    }
}

impl From<LedgerError> for DispatchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Conflict { .. } => Self::Conflict(err.to_string()),
            LedgerError::Store(store) => Self::Storage(store.to_string()),
        }
    }
}

impl From<herald_ledger::StoreError> for DispatchError {
    fn from(err: herald_ledger::StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}
