//! Scripted transport for tests and dry runs

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use herald_common::InstanceId;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{OutboundPayload, SendOptions, Transport, TransportReceipt};
use crate::error::TransportError;

/// One recorded `send_message` invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub instance_id: InstanceId,
    pub payload: OutboundPayload,
    pub options: SendOptions,
}

type Scripted = Result<TransportReceipt, TransportError>;

/// Replays queued results in order, then falls back to a default
///
/// With nothing queued and no default failure set, every send succeeds
/// with a receipt `mock-<n>` in status `SENT`.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<TransportError>>,
    calls: Mutex<Vec<RecordedCall>>,
    sequence: AtomicU64,
    held: AtomicBool,
    released: Notify,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, external_id: impl Into<String>, status: impl Into<String>) {
        self.script.lock().push_back(Ok(TransportReceipt {
            external_id: external_id.into(),
            status: status.into(),
            timestamp: None,
            raw: None,
        }));
    }

    pub fn push_err(&self, err: TransportError) {
        self.script.lock().push_back(Err(err));
    }

    /// Fail every unscripted call with `err`; `None` restores success
    pub fn set_default(&self, err: Option<TransportError>) {
        *self.fallback.lock() = err;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Park calls after they are recorded until [`release`](Self::release)
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    async fn wait_for_release(&self) {
        loop {
            let released = self.released.notified();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn send_message(
        &self,
        instance_id: &InstanceId,
        payload: &OutboundPayload,
        options: &SendOptions,
    ) -> Result<TransportReceipt, TransportError> {
        self.calls.lock().push(RecordedCall {
            instance_id: instance_id.clone(),
            payload: payload.clone(),
            options: options.clone(),
        });

        self.wait_for_release().await;

        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }

        if let Some(err) = self.fallback.lock().clone() {
            return Err(err);
        }

        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TransportReceipt {
            external_id: format!("mock-{n}"),
            status: "SENT".to_string(),
            timestamp: None,
            raw: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_default() {
        let transport = MockTransport::new();
        transport.push_err(TransportError::Timeout("slow".to_string()));
        transport.push_ok("ext-9", "DELIVERED");

        let instance = InstanceId::from("wa-1");
        let payload = OutboundPayload::default();
        let options = SendOptions::default();

        assert!(transport.send_message(&instance, &payload, &options).await.is_err());
        assert_eq!(
            transport
                .send_message(&instance, &payload, &options)
                .await
                .unwrap()
                .external_id,
            "ext-9"
        );
        assert_eq!(
            transport
                .send_message(&instance, &payload, &options)
                .await
                .unwrap()
                .external_id,
            "mock-1"
        );

        transport.set_default(Some(TransportError::Other("down".to_string())));
        assert!(transport.send_message(&instance, &payload, &options).await.is_err());
        assert_eq!(transport.call_count(), 4);
    }

    #[tokio::test]
    async fn test_held_calls_finish_on_release() {
        let transport = std::sync::Arc::new(MockTransport::new());
        transport.hold();

        let pending = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_message(
                        &InstanceId::from("wa-1"),
                        &OutboundPayload::default(),
                        &SendOptions::default(),
                    )
                    .await
            }
        });

        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        transport.release();
        let receipt = pending.await.unwrap().unwrap();
        assert_eq!(receipt.external_id, "mock-1");
    }
}
