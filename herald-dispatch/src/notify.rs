//! Fire-and-forget notifications about message and channel state

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use herald_common::{InstanceId, Message, MessageStatus, TenantId};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    MessageCreated {
        message: Message,
    },
    MessageUpdated {
        message: Message,
        /// Status before this change
        previous: MessageStatus,
    },
    CircuitOpened {
        tenant_id: TenantId,
        instance_id: InstanceId,
        failure_count: u32,
        window_ms: u64,
        cooldown_ms: u64,
        retry_at: Option<DateTime<Utc>>,
    },
    CircuitClosed {
        tenant_id: TenantId,
        instance_id: InstanceId,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::MessageUpdated { .. } => "message_updated",
            Self::CircuitOpened { .. } => "circuit_opened",
            Self::CircuitClosed { .. } => "circuit_closed",
        }
    }
}

/// Receiver of notifications
///
/// `notify` must not block and cannot fail from the caller's point of view;
/// delivery problems are the sink's own concern.
pub trait NotificationSink: Send + Sync + Debug {
    fn notify(&self, notification: Notification);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Fans notifications out to any number of subscribers
///
/// Sending with no subscribers, or to subscribers that lag behind, drops the
/// notification.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: Notification) {
        let name = notification.name();
        if self.sender.send(notification).is_err() {
            tracing::trace!(notification = name, "No subscribers for notification");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn closed() -> Notification {
        Notification::CircuitClosed {
            tenant_id: TenantId::from("acme"),
            instance_id: InstanceId::from("wa-1"),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.notify(closed());

        assert_eq!(first.recv().await.unwrap().name(), "circuit_closed");
        assert_eq!(second.recv().await.unwrap().name(), "circuit_closed");
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        BroadcastSink::default().notify(closed());
        NullSink.notify(closed());
    }

    #[test]
    fn test_wire_form_is_tagged() {
        let value = serde_json::to_value(closed()).unwrap();
        assert_eq!(value["event"], "circuit_closed");
        assert_eq!(value["tenant_id"], "acme");
    }
}
