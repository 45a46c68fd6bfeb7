//! Shared fixtures for dispatch integration tests
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::{
    ChannelInstance, ChannelKind, ConnectionState, Contact, InstanceId, ManualClock, Message,
    MessageContent, MessageId, TenantId, Ticket, TicketId,
};
use herald_dispatch::{
    BroadcastSink, CircuitBreakerConfig, DispatchConfig, Dispatcher, MockTransport, Notification,
    RateLimitConfig, SendRequest,
};
use herald_ledger::{MemoryDirectory, MessageStore, StoreResult, TestMessageStore};
use parking_lot::Mutex;
use serde_json::{Map, json};
use tokio::sync::{Barrier, broadcast};

pub const TENANT: &str = "acme";
pub const INSTANCE: &str = "wa-1";
pub const PHONE: &str = "5511999990000";

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub transport: Arc<MockTransport>,
    pub store: TestMessageStore,
    pub directory: MemoryDirectory,
    pub clock: Arc<ManualClock>,
    pub events: broadcast::Receiver<Notification>,
}

/// Breaker opens after 3 failures in 60s and cools down for 30s; 100 TPS
pub fn config() -> DispatchConfig {
    DispatchConfig {
        rate_limit: RateLimitConfig {
            default_tps: 100,
            ..RateLimitConfig::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            window_ms: 60_000,
            cooldown_ms: 30_000,
        },
    }
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: DispatchConfig) -> Harness {
    harness_over(config, |store| Arc::new(store))
}

/// Build a harness whose dispatcher reaches the test store through `wrap`
pub fn harness_over(
    config: DispatchConfig,
    wrap: impl FnOnce(TestMessageStore) -> Arc<dyn MessageStore>,
) -> Harness {
    let transport = Arc::new(MockTransport::new());
    let store = TestMessageStore::new();
    let directory = MemoryDirectory::new();
    let clock = Arc::new(ManualClock::epoch());
    let sink = Arc::new(BroadcastSink::new(256));
    let events = sink.subscribe();

    directory.insert_instance(instance(INSTANCE, TENANT, ConnectionState::Connected));
    directory.insert_ticket(ticket("t-1", Some(PHONE), ChannelKind::Whatsapp, Some(INSTANCE)));

    let dispatcher = Dispatcher::builder(
        wrap(store.clone()),
        Arc::new(directory.clone()),
        transport.clone(),
    )
    .config(config)
    .clock(clock.clone())
    .notifier(sink)
    .build();

    Harness {
        dispatcher,
        transport,
        store,
        directory,
        clock,
        events,
    }
}

pub fn instance(id: &str, tenant: &str, state: ConnectionState) -> ChannelInstance {
    ChannelInstance {
        id: InstanceId::from(id),
        tenant_id: TenantId::from(tenant),
        provider: "broker".to_string(),
        state,
    }
}

pub fn ticket(id: &str, phone: Option<&str>, channel: ChannelKind, instance: Option<&str>) -> Ticket {
    let mut metadata = Map::new();
    metadata.insert("queue".to_string(), json!("support"));
    metadata.insert("source".to_string(), json!("ticket"));

    Ticket {
        id: TicketId::from(id),
        tenant_id: TenantId::from(TENANT),
        contact: Some(Contact {
            name: Some("Ana".to_string()),
            phone: phone.map(str::to_string),
        }),
        channel,
        instance_id: instance.map(InstanceId::from),
        metadata,
    }
}

pub fn send(ticket_id: &str, body: &str) -> SendRequest {
    SendRequest::new(
        TenantId::from(TENANT),
        TicketId::from(ticket_id),
        MessageContent::text(body),
    )
}

impl Harness {
    /// Every notification emitted so far
    pub fn drain_events(&mut self) -> Vec<Notification> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn names(events: &[Notification]) -> Vec<&'static str> {
    events.iter().map(Notification::name).collect()
}

/// Holds external id lookups at a barrier once armed, so concurrent callers
/// all read a record before any of them writes it back
#[derive(Debug, Clone)]
pub struct LockstepStore {
    inner: TestMessageStore,
    barrier: Arc<Mutex<Option<Arc<Barrier>>>>,
}

impl LockstepStore {
    pub fn new(inner: TestMessageStore) -> Self {
        Self {
            inner,
            barrier: Arc::default(),
        }
    }

    pub fn arm(&self, parties: usize) {
        *self.barrier.lock() = Some(Arc::new(Barrier::new(parties)));
    }
}

#[async_trait]
impl MessageStore for LockstepStore {
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
        let barrier = self.barrier.lock().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        Ok(found)
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> StoreResult<Option<Message>> {
        self.inner.find_by_idempotency_key(tenant_id, key).await
    }

    async fn list_by_ticket(
        &self,
        tenant_id: &TenantId,
        ticket_id: &TicketId,
    ) -> StoreResult<Vec<Message>> {
        self.inner.list_by_ticket(tenant_id, ticket_id).await
    }
}
