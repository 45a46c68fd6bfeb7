//! The broker boundary
//!
//! A [`Transport`] takes a fully built [`OutboundPayload`] to a broker and
//! either returns its receipt or a [`TransportError`] classified at the
//! boundary. Nothing past this module sees provider-specific responses.

pub mod http;
pub mod mock;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{ContactCard, InstanceId, Location, Message, Template};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::{
    http::{HttpTransport, HttpTransportConfig},
    mock::MockTransport,
};
use crate::error::TransportError;

/// What the broker is asked to deliver
///
/// Every part besides `to` and `content` is independently optional and left
/// off the wire when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    pub to: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<ContactCard>,
}

impl OutboundPayload {
    /// Payload delivering `message` to `to`
    #[must_use]
    pub fn for_message(message: &Message, to: &str) -> Self {
        let content = &message.content;
        let media = content.media.as_ref();

        Self {
            to: to.to_string(),
            content: content.body.clone(),
            caption: content.caption.clone(),
            media_url: media.map(|media| media.url.clone()),
            media_mime_type: media.and_then(|media| media.mime_type.clone()),
            media_file_name: media.and_then(|media| media.file_name.clone()),
            preview_url: content.preview_url,
            location: content.location.clone(),
            template: content.template.clone(),
            contacts: content.contacts.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Lets the broker collapse retries of the same send
    pub idempotency_key: Option<String>,
}

/// The broker's acceptance of a send
#[derive(Debug, Clone, PartialEq)]
pub struct TransportReceipt {
    /// The broker's id for the message
    pub external_id: String,
    /// Status exactly as the broker reported it
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub raw: Option<Value>,
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Name recorded as the provider in broker diagnostics
    fn provider(&self) -> &str;

    /// Send one payload through `instance_id`
    ///
    /// # Errors
    ///
    /// [`TransportError`] when the broker rejects the send or cannot be reached.
    async fn send_message(
        &self,
        instance_id: &InstanceId,
        payload: &OutboundPayload,
        options: &SendOptions,
    ) -> Result<TransportReceipt, TransportError>;
}
