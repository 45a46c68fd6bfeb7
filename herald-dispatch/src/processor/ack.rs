//! Broker acknowledgements

use herald_common::{Message, TenantId, TicketId, incoming};

use super::Dispatcher;
use crate::{error::DispatchError, notify::Notification, reconciler::Acknowledgement};

impl Dispatcher {
    /// Apply a delivery/read acknowledgement to the message it refers to
    ///
    /// Stale acknowledgements are accepted but never move the status back;
    /// the broker snapshot still records them.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotFound`] when no message of the tenant carries the
    /// acknowledged external id, or persistence failures.
    pub async fn acknowledge(&self, ack: Acknowledgement) -> Result<Message, DispatchError> {
        incoming!(
            level = DEBUG,
            tenant = %ack.tenant_id,
            external_id = %ack.external_id,
            status = %ack.status,
            "Broker acknowledgement received"
        );

        let (message, transition) = self
            .reconciler
            .acknowledge(self.transport.provider(), &ack)
            .await?;

        if transition.changed() {
            incoming!(
                level = INFO,
                message_id = %message.id,
                from = %transition.previous,
                to = %transition.current,
                "Message status advanced"
            );

            self.notifier.notify(Notification::MessageUpdated {
                message: message.clone(),
                previous: transition.previous,
            });
        }

        Ok(message)
    }

    /// A ticket's messages in creation order
    ///
    /// # Errors
    ///
    /// Persistence failures.
    pub async fn history(
        &self,
        tenant_id: &TenantId,
        ticket_id: &TicketId,
    ) -> Result<Vec<Message>, DispatchError> {
        Ok(self.ledger.history(tenant_id, ticket_id).await?)
    }
}
