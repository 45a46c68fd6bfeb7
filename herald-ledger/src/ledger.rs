use std::sync::Arc;

use herald_common::{Clock, Message, MessageId, NewMessage, TenantId, TicketId, internal};
use herald_tracing::traced;

use crate::{
    error::{Constraint, LedgerError, Result, StoreError},
    store::MessageStore,
};

/// Outcome of [`Ledger::create`]
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub message: Message,
    /// The request resolved to a record that already existed
    pub duplicate: bool,
}

/// Idempotent persistence of message records
///
/// The ledger never pre-checks for duplicates. It lets the store's unique
/// constraints arbitrate, then resolves a violation by loading the record
/// holding the anchor and merging the new request's enrichment into it, so
/// concurrent creates for one anchor all observe the same message id.
#[derive(Debug, Clone)]
pub struct Ledger {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Persist a new message, or resolve it to the record already holding its anchor
    ///
    /// # Errors
    ///
    /// [`LedgerError::Conflict`] when the store reports a violation but no
    /// record can be found for the anchor, or any other store failure.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, input), fields(tenant = %tenant_id, ticket = %ticket_id)), timing(precision = "us"))]
    pub async fn create(
        &self,
        tenant_id: &TenantId,
        ticket_id: &TicketId,
        input: NewMessage,
    ) -> Result<Recorded> {
        let message = Message::create(
            MessageId::generate(),
            tenant_id.clone(),
            ticket_id.clone(),
            input.clone(),
            self.clock.now(),
        );

        match self.store.insert(&message).await {
            Ok(()) => {
                if let Some(metrics) = herald_metrics::try_metrics() {
                    metrics.ledger.record_created(tenant_id.as_str());
                }

                Ok(Recorded {
                    message,
                    duplicate: false,
                })
            }
            Err(StoreError::UniqueViolation { constraint }) => {
                self.resolve_duplicate(tenant_id, constraint, &input).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn resolve_duplicate(
        &self,
        tenant_id: &TenantId,
        constraint: Constraint,
        input: &NewMessage,
    ) -> Result<Recorded> {
        let existing = match constraint {
            Constraint::ExternalId => match input.external_id.as_deref() {
                Some(external_id) => {
                    self.store
                        .find_by_external_id(tenant_id, external_id)
                        .await?
                }
                None => None,
            },
            Constraint::IdempotencyKey => match input.idempotency_key.as_deref() {
                Some(key) => self.store.find_by_idempotency_key(tenant_id, key).await?,
                None => None,
            },
        };

        let Some(existing) = existing else {
            internal!(
                level = ERROR,
                tenant = %tenant_id,
                %constraint,
                "Unique violation reported but no message holds the anchor"
            );
            return Err(LedgerError::Conflict { constraint });
        };

        let now = self.clock.now();
        let existing = self
            .store
            .modify(tenant_id, &existing.id, &mut |row| row.merge(input, now))
            .await?;

        internal!(
            level = DEBUG,
            tenant = %tenant_id,
            message_id = %existing.id,
            %constraint,
            "Resolved duplicate create to existing message"
        );

        if let Some(metrics) = herald_metrics::try_metrics() {
            metrics.ledger.record_duplicate(tenant_id.as_str());
        }

        Ok(Recorded {
            message: existing,
            duplicate: true,
        })
    }

    /// Change a stored record in place, stamping `updated_at`
    ///
    /// `change` sees the current stored record, never a caller's copy, so
    /// status rules applied inside it hold against concurrent writers.
    ///
    /// # Errors
    ///
    /// Any store failure, including a clash on a newly assigned external id.
    pub async fn modify(
        &self,
        tenant_id: &TenantId,
        id: &MessageId,
        change: &mut (dyn for<'m> FnMut(&'m mut Message) + Send),
    ) -> Result<Message> {
        let now = self.clock.now();
        let message = self
            .store
            .modify(tenant_id, id, &mut |row| {
                change(row);
                row.updated_at = now;
            })
            .await?;
        Ok(message)
    }

    /// # Errors
    ///
    /// Any store failure.
    pub async fn find(&self, tenant_id: &TenantId, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.store.find_by_id(tenant_id, id).await?)
    }

    /// # Errors
    ///
    /// Any store failure.
    pub async fn find_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .store
            .find_by_external_id(tenant_id, external_id)
            .await?)
    }

    /// # Errors
    ///
    /// Any store failure.
    pub async fn history(&self, tenant_id: &TenantId, ticket_id: &TicketId) -> Result<Vec<Message>> {
        Ok(self.store.list_by_ticket(tenant_id, ticket_id).await?)
    }
}
