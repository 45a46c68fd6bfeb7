use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use herald_common::{Message, MessageId, TenantId, TicketId};

use crate::{
    error::{Constraint, StoreError},
    store::{MessageStore, StoreResult},
};

type Anchor = (TenantId, String);

/// In-memory message store
///
/// Rows live in a `DashMap` keyed by message id, with one index map per
/// uniqueness constraint. A row is inserted before its anchors are claimed, so
/// anything reachable through an index is always readable; a losing insert
/// releases whatever it claimed and removes its row again.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageStore {
    pub(crate) rows: Arc<DashMap<MessageId, Message>>,
    external_ids: Arc<DashMap<Anchor, MessageId>>,
    idempotency_keys: Arc<DashMap<Anchor, MessageId>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Claim `anchor` for `id`; true when it is now (or already was) held by `id`
    fn claim(index: &DashMap<Anchor, MessageId>, anchor: Anchor, id: MessageId) -> bool {
        *index.entry(anchor).or_insert(id) == id
    }

    fn release(index: &DashMap<Anchor, MessageId>, anchor: &Anchor, id: MessageId) {
        index.remove_if(anchor, |_, holder| *holder == id);
    }

    fn lookup(&self, index: &DashMap<Anchor, MessageId>, anchor: &Anchor) -> Option<Message> {
        let id = *index.get(anchor)?;
        self.rows.get(&id).map(|row| row.clone())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: &Message) -> StoreResult<()> {
        let id = message.id;
        let tenant = &message.tenant_id;

        if self.rows.contains_key(&id) {
            return Err(StoreError::Internal(format!("Message {id} already exists")));
        }
        self.rows.insert(id, message.clone());

        let external = message
            .external_id
            .as_ref()
            .map(|external_id| (tenant.clone(), external_id.clone()));
        let idempotency = message
            .idempotency_key
            .as_ref()
            .map(|key| (tenant.clone(), key.clone()));

        if let Some(anchor) = &external {
            if !Self::claim(&self.external_ids, anchor.clone(), id) {
                self.rows.remove(&id);
                return Err(StoreError::UniqueViolation {
                    constraint: Constraint::ExternalId,
                });
            }
        }

        if let Some(anchor) = &idempotency {
            if !Self::claim(&self.idempotency_keys, anchor.clone(), id) {
                if let Some(external) = &external {
                    Self::release(&self.external_ids, external, id);
                }
                self.rows.remove(&id);
                return Err(StoreError::UniqueViolation {
                    constraint: Constraint::IdempotencyKey,
                });
            }
        }

        Ok(())
    }

    async fn modify(
        &self,
        tenant_id: &TenantId,
        id: &MessageId,
        change: &mut (dyn for<'m> FnMut(&'m mut Message) + Send),
    ) -> StoreResult<Message> {
        let mut row = self
            .rows
            .get_mut(id)
            .filter(|row| row.tenant_id == *tenant_id)
            .ok_or(StoreError::NotFound(*id))?;

        let mut next = row.clone();
        change(&mut next);
        next.id = row.id;
        next.tenant_id = row.tenant_id.clone();
        next.idempotency_key = row.idempotency_key.clone();

        // The row stays locked while the index moves; index guards are never
        // held while taking a row lock, so the order cannot invert.
        if next.external_id != row.external_id {
            if let Some(external_id) = &next.external_id {
                let anchor = (tenant_id.clone(), external_id.clone());
                if !Self::claim(&self.external_ids, anchor, *id) {
                    return Err(StoreError::UniqueViolation {
                        constraint: Constraint::ExternalId,
                    });
                }
            }

            if let Some(previous) = &row.external_id {
                Self::release(&self.external_ids, &(tenant_id.clone(), previous.clone()), *id);
            }
        }

        *row = next.clone();
        Ok(next)
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &MessageId,
    ) -> StoreResult<Option<Message>> {
        Ok(self
            .rows
            .get(id)
            .filter(|row| row.tenant_id == *tenant_id)
            .map(|row| row.clone()))
    }

    async fn find_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> StoreResult<Option<Message>> {
        let anchor = (tenant_id.clone(), external_id.to_string());
        Ok(self.lookup(&self.external_ids, &anchor))
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> StoreResult<Option<Message>> {
        let anchor = (tenant_id.clone(), key.to_string());
        Ok(self.lookup(&self.idempotency_keys, &anchor))
    }

    async fn list_by_ticket(
        &self,
        tenant_id: &TenantId,
        ticket_id: &TicketId,
    ) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<_> = self
            .rows
            .iter()
            .filter(|row| row.tenant_id == *tenant_id && row.ticket_id == *ticket_id)
            .map(|row| row.clone())
            .collect();

        messages.sort_by_key(|message| (message.created_at, message.id));

        Ok(messages)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use herald_common::{Clock, MessageContent, MessageStatus, NewMessage, SystemClock};

    use super::*;

    fn message(tenant: &str, external_id: Option<&str>, key: Option<&str>) -> Message {
        Message::create(
            MessageId::generate(),
            TenantId::from(tenant),
            TicketId::from("t-1"),
            NewMessage {
                content: MessageContent::text("hi"),
                external_id: external_id.map(str::to_string),
                idempotency_key: key.map(str::to_string),
                ..NewMessage::default()
            },
            SystemClock.now(),
        )
    }

    #[tokio::test]
    async fn test_external_id_is_unique_per_tenant() {
        let store = MemoryMessageStore::new();

        store
            .insert(&message("acme", Some("wamid.1"), None))
            .await
            .expect("first insert");

        let clash = store.insert(&message("acme", Some("wamid.1"), None)).await;
        assert!(matches!(
            clash,
            Err(StoreError::UniqueViolation {
                constraint: Constraint::ExternalId
            })
        ));

        store
            .insert(&message("globex", Some("wamid.1"), None))
            .await
            .expect("other tenant may reuse the id");

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_losing_insert_releases_its_claims() {
        let store = MemoryMessageStore::new();
        store
            .insert(&message("acme", None, Some("key-1")))
            .await
            .unwrap();

        let loser = message("acme", Some("wamid.9"), Some("key-1"));
        let clash = store.insert(&loser).await;
        assert!(matches!(
            clash,
            Err(StoreError::UniqueViolation {
                constraint: Constraint::IdempotencyKey
            })
        ));

        assert_eq!(store.len(), 1);
        assert!(
            store
                .find_by_external_id(&TenantId::from("acme"), "wamid.9")
                .await
                .unwrap()
                .is_none()
        );

        store
            .insert(&message("acme", Some("wamid.9"), None))
            .await
            .expect("released external id is free again");
    }

    #[tokio::test]
    async fn test_modify_moves_the_external_index() {
        let store = MemoryMessageStore::new();
        let tenant = TenantId::from("acme");

        let first = message("acme", None, None);
        store.insert(&first).await.unwrap();
        store
            .insert(&message("acme", Some("wamid.taken"), None))
            .await
            .unwrap();

        let clash = store
            .modify(&tenant, &first.id, &mut |row| {
                row.external_id = Some("wamid.taken".to_string());
                row.status = MessageStatus::Sent;
            })
            .await;
        assert!(matches!(clash, Err(StoreError::UniqueViolation { .. })));

        let untouched = store.find_by_id(&tenant, &first.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, MessageStatus::Pending);
        assert!(untouched.external_id.is_none());

        let written = store
            .modify(&tenant, &first.id, &mut |row| {
                row.external_id = Some("wamid.2".to_string());
            })
            .await
            .unwrap();
        assert_eq!(written.external_id.as_deref(), Some("wamid.2"));

        let found = store
            .find_by_external_id(&tenant, "wamid.2")
            .await
            .unwrap()
            .expect("indexed");
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_modify_keeps_identity() {
        let store = MemoryMessageStore::new();
        let record = message("acme", None, Some("key-1"));
        store.insert(&record).await.unwrap();

        let written = store
            .modify(&record.tenant_id, &record.id, &mut |row| {
                row.id = MessageId::generate();
                row.tenant_id = TenantId::from("globex");
                row.idempotency_key = None;
            })
            .await
            .unwrap();

        assert_eq!(written.id, record.id);
        assert_eq!(written.tenant_id, record.tenant_id);
        assert_eq!(written.idempotency_key.as_deref(), Some("key-1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_modifications_are_not_lost() {
        let store = MemoryMessageStore::new();
        let record = message("acme", None, None);
        store.insert(&record).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let store = store.clone();
                let (tenant, id) = (record.tenant_id.clone(), record.id);
                tokio::spawn(async move {
                    store
                        .modify(&tenant, &id, &mut |row| {
                            row.metadata
                                .extra
                                .insert(format!("writer-{n}"), serde_json::json!(n));
                        })
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.find_by_id(&record.tenant_id, &record.id).await.unwrap().unwrap();
        assert_eq!(stored.metadata.extra.len(), 16);
    }

    #[tokio::test]
    async fn test_modify_unknown_or_foreign_message() {
        let store = MemoryMessageStore::new();
        let missing = message("acme", None, None);

        assert!(matches!(
            store.modify(&missing.tenant_id, &missing.id, &mut |_| {}).await,
            Err(StoreError::NotFound(id)) if id == missing.id
        ));

        store.insert(&missing).await.unwrap();
        assert!(matches!(
            store
                .modify(&TenantId::from("globex"), &missing.id, &mut |_| {})
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_id_is_tenant_scoped() {
        let store = MemoryMessageStore::new();
        let record = message("acme", None, None);
        store.insert(&record).await.unwrap();

        assert!(
            store
                .find_by_id(&TenantId::from("globex"), &record.id)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_by_id(&TenantId::from("acme"), &record.id)
                .await
                .unwrap()
                .is_some()
        );
    }
}
