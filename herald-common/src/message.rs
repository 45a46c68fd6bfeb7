//! The message record and its diagnostic metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    ErrorCode,
    ids::{InstanceId, MessageId, TenantId, TicketId},
    status::{Direction, MessageStatus},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// A pre-approved provider template; `components` are passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCard {
    pub name: String,
    pub phone: String,
}

/// What the message says. Every part other than `body` is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    /// Ask the broker to render a link preview for URLs in `body`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<ContactCard>,
}

impl MessageContent {
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerErrorDiagnostic {
    pub message: String,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
    pub failed_at: DateTime<Utc>,
}

/// Snapshot of the most recent dispatch attempt or acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerDiagnostic {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Status string exactly as the broker reported it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BrokerErrorDiagnostic>,
}

/// Known diagnostic fields plus a single passthrough map
///
/// `broker` only ever holds the latest snapshot: every dispatch attempt and
/// every acknowledgement replaces it wholesale, so an earlier failure is not
/// retained once a later attempt is recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<BrokerDiagnostic>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub ticket_id: TicketId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    pub direction: Direction,
    pub status: MessageStatus,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to ledger creation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub content: MessageContent,
    /// Delivery identifier already known to the caller, honoured as-is
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Message {
    #[must_use]
    pub fn create(
        id: MessageId,
        tenant_id: TenantId,
        ticket_id: TicketId,
        input: NewMessage,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            ticket_id,
            external_id: input.external_id,
            instance_id: input.instance_id,
            direction: input.direction,
            status: input.status,
            content: input.content,
            idempotency_key: input.idempotency_key,
            metadata: MessageMetadata {
                broker: None,
                extra: input.extra,
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a duplicate creation request into this record
    ///
    /// Only enrichment is merged: the instance id when one is supplied and the
    /// passthrough fields, with incoming keys winning. Status, content and
    /// the broker snapshot belong to the existing record.
    pub fn merge(&mut self, incoming: &NewMessage, now: DateTime<Utc>) {
        if let Some(instance_id) = &incoming.instance_id {
            self.instance_id = Some(instance_id.clone());
        }

        for (key, value) in &incoming.extra {
            self.metadata.extra.insert(key.clone(), value.clone());
        }

        self.updated_at = now;
    }

    /// Move to `next` if that is a forward transition; returns whether it moved
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap_or_default()
    }

    fn sample() -> Message {
        let mut extra = Map::new();
        extra.insert("campaign".to_string(), json!("spring"));
        extra.insert("source".to_string(), json!("api"));

        Message::create(
            MessageId::generate(),
            TenantId::from("acme"),
            TicketId::from("t-1"),
            NewMessage {
                content: MessageContent::text("hello"),
                instance_id: Some(InstanceId::from("wa-1")),
                extra,
                ..NewMessage::default()
            },
            at(0),
        )
    }

    #[test]
    fn test_merge_keeps_state_and_overlays_enrichment() {
        let mut message = sample();
        message.status = MessageStatus::Sent;

        let mut extra = Map::new();
        extra.insert("source".to_string(), json!("webhook"));
        extra.insert("agent".to_string(), json!("jo"));

        message.merge(
            &NewMessage {
                status: MessageStatus::Pending,
                content: MessageContent::text("ignored"),
                instance_id: Some(InstanceId::from("wa-2")),
                extra,
                ..NewMessage::default()
            },
            at(5),
        );

        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.content.body, "hello");
        assert_eq!(message.instance_id, Some(InstanceId::from("wa-2")));
        assert_eq!(message.metadata.extra.get("campaign"), Some(&json!("spring")));
        assert_eq!(message.metadata.extra.get("source"), Some(&json!("webhook")));
        assert_eq!(message.metadata.extra.get("agent"), Some(&json!("jo")));
        assert_eq!(message.updated_at, at(5));
        assert_eq!(message.created_at, at(0));
    }

    #[test]
    fn test_merge_without_instance_keeps_existing() {
        let mut message = sample();
        message.merge(&NewMessage::default(), at(1));
        assert_eq!(message.instance_id, Some(InstanceId::from("wa-1")));
    }

    #[test]
    fn test_advance_is_forward_only() {
        let mut message = sample();
        assert!(message.advance(MessageStatus::Delivered));
        assert!(!message.advance(MessageStatus::Sent));
        assert!(!message.advance(MessageStatus::Failed));
        assert_eq!(message.status, MessageStatus::Delivered);
    }

    #[test]
    fn test_optional_parts_are_omitted_on_the_wire() {
        let value = serde_json::to_value(MessageContent::text("hi")).unwrap_or_default();
        assert_eq!(value, json!({ "body": "hi" }));
    }
}
