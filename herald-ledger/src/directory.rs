//! Lookup of tickets and channel instances owned by other subsystems

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use herald_common::{ChannelInstance, ConnectionState, InstanceId, TenantId, Ticket, TicketId};

use crate::store::StoreResult;

#[async_trait]
pub trait Directory: Send + Sync + Debug {
    /// A ticket within `tenant_id`
    async fn find_ticket(
        &self,
        tenant_id: &TenantId,
        ticket_id: &TicketId,
    ) -> StoreResult<Option<Ticket>>;

    /// A channel instance by id, regardless of which tenant owns it
    async fn find_instance(&self, instance_id: &InstanceId)
    -> StoreResult<Option<ChannelInstance>>;
}

/// Directory held in memory, seeded by the caller
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    tickets: Arc<DashMap<(TenantId, TicketId), Ticket>>,
    instances: Arc<DashMap<InstanceId, ChannelInstance>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ticket(&self, ticket: Ticket) {
        self.tickets
            .insert((ticket.tenant_id.clone(), ticket.id.clone()), ticket);
    }

    pub fn insert_instance(&self, instance: ChannelInstance) {
        self.instances.insert(instance.id.clone(), instance);
    }

    /// Change an instance's connection state; false if it is unknown
    pub fn set_state(&self, instance_id: &InstanceId, state: ConnectionState) -> bool {
        self.instances
            .get_mut(instance_id)
            .map(|mut instance| instance.state = state)
            .is_some()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn find_ticket(
        &self,
        tenant_id: &TenantId,
        ticket_id: &TicketId,
    ) -> StoreResult<Option<Ticket>> {
        Ok(self
            .tickets
            .get(&(tenant_id.clone(), ticket_id.clone()))
            .map(|ticket| ticket.clone()))
    }

    async fn find_instance(
        &self,
        instance_id: &InstanceId,
    ) -> StoreResult<Option<ChannelInstance>> {
        Ok(self
            .instances
            .get(instance_id)
            .map(|instance| instance.clone()))
    }
}
