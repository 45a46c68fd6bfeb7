//! Error types for the ledger crate

use std::fmt;

use herald_common::MessageId;
use thiserror::Error;

/// A per-tenant uniqueness constraint enforced by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// `(tenant_id, external_id)`
    ExternalId,
    /// `(tenant_id, idempotency_key)`
    IdempotencyKey,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExternalId => "tenant_id, external_id",
            Self::IdempotencyKey => "tenant_id, idempotency_key",
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("Unique constraint violated on ({constraint})")]
    UniqueViolation { constraint: Constraint },

    /// Backend failure (lock poisoning, connectivity, ..)
    #[error("Internal store error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The store reported a uniqueness violation but no row holds the anchor
    #[error("Conflicting write on ({constraint}) but no existing message was found")]
    Conflict { constraint: Constraint },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
