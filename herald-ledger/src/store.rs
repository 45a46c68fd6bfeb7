use std::fmt::Debug;

use async_trait::async_trait;
use herald_common::{Message, MessageId, TenantId, TicketId};

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence for message records
///
/// Implementations enforce uniqueness of `(tenant_id, external_id)` and
/// `(tenant_id, idempotency_key)` whenever those fields are present, and
/// report a clash as [`StoreError::UniqueViolation`].
#[async_trait]
pub trait MessageStore: Send + Sync + Debug {
    /// Insert a new record
    ///
    /// # Errors
    ///
    /// [`StoreError::UniqueViolation`] when another record already holds one of
    /// the record's anchors.
    async fn insert(&self, message: &Message) -> StoreResult<()>;

    /// Apply `change` to the stored record and return the record as written
    ///
    /// `change` runs while the record is locked against other writers, so a
    /// read-check-write inside it is atomic. Identity fields (`id`,
    /// `tenant_id`, `idempotency_key`) keep their stored values whatever
    /// `change` does to them. `change` must not call back into the store.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the tenant has no record with this id, or
    /// [`StoreError::UniqueViolation`] when a newly assigned external id is
    /// already taken; the stored record is then left untouched.
    async fn modify(
        &self,
        tenant_id: &TenantId,
        id: &MessageId,
        change: &mut (dyn for<'m> FnMut(&'m mut Message) + Send),
    ) -> StoreResult<Message>;

    async fn find_by_id(&self, tenant_id: &TenantId, id: &MessageId)
    -> StoreResult<Option<Message>>;

    async fn find_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> StoreResult<Option<Message>>;

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> StoreResult<Option<Message>>;

    /// All records of a ticket, oldest first
    async fn list_by_ticket(
        &self,
        tenant_id: &TenantId,
        ticket_id: &TicketId,
    ) -> StoreResult<Vec<Message>>;
}
