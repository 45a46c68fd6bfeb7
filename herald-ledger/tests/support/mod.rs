#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use herald_common::{
    InstanceId, ManualClock, Message, MessageContent, MessageId, NewMessage, TenantId, TicketId,
};
use herald_ledger::{Ledger, MessageStore, StoreResult, TestMessageStore};
use serde_json::{Map, Value, json};

pub struct Harness {
    pub ledger: Ledger,
    pub store: TestMessageStore,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    let store = TestMessageStore::new();
    let clock = Arc::new(ManualClock::epoch());
    let ledger = Ledger::new(Arc::new(store.clone()), clock.clone());

    Harness {
        ledger,
        store,
        clock,
    }
}

pub fn extra(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

pub fn inbound(external_id: &str) -> NewMessage {
    NewMessage {
        direction: herald_common::Direction::Inbound,
        content: MessageContent::text("hello from the customer"),
        external_id: Some(external_id.to_string()),
        instance_id: Some(InstanceId::from("wa-1")),
        extra: extra(&[("source", json!("webhook"))]),
        ..NewMessage::default()
    }
}

type Interleaved = Box<dyn for<'m> FnMut(&'m mut Message) + Send>;

/// Wraps a store and writes to a record right after the next anchor lookup
/// returns it, as a concurrent writer would between a caller's read and write
#[derive(Clone)]
pub struct InterleavingStore {
    pub inner: TestMessageStore,
    pending: Arc<Mutex<Option<Interleaved>>>,
}

impl std::fmt::Debug for InterleavingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterleavingStore")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl InterleavingStore {
    pub fn new(inner: TestMessageStore) -> Self {
        Self {
            inner,
            pending: Arc::default(),
        }
    }

    pub fn after_next_lookup(&self, change: impl FnMut(&mut Message) + Send + 'static) {
        *self.pending.lock().unwrap() = Some(Box::new(change));
    }

    async fn interleave(&self, found: Option<Message>) -> StoreResult<Option<Message>> {
        let pending = self.pending.lock().unwrap().take();
        if let (Some(mut change), Some(message)) = (pending, &found) {
            self.inner
                .modify(&message.tenant_id, &message.id, &mut *change)
                .await?;
        }
        Ok(found)
    }
}

#[async_trait]
impl MessageStore for InterleavingStore {
    async fn insert(&self, message: &Message) -> StoreResult<()> {
        self.inner.insert(message).await
    }

    async fn modify(
        &self,
        tenant_id: &TenantId,
        id: &MessageId,
        change: &mut (dyn for<'m> FnMut(&'m mut Message) + Send),
    ) -> StoreResult<Message> {
        self.inner.modify(tenant_id, id, change).await
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &MessageId,
    ) -> StoreResult<Option<Message>> {
        self.inner.find_by_id(tenant_id, id).await
    }

    async fn find_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> StoreResult<Option<Message>> {
        let found = self.inner.find_by_external_id(tenant_id, external_id).await?;
        self.interleave(found).await
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> StoreResult<Option<Message>> {
        let found = self.inner.find_by_idempotency_key(tenant_id, key).await?;
        self.interleave(found).await
    }

    async fn list_by_ticket(
        &self,
        tenant_id: &TenantId,
        ticket_id: &TicketId,
    ) -> StoreResult<Vec<Message>> {
        self.inner.list_by_ticket(tenant_id, ticket_id).await
    }
}
