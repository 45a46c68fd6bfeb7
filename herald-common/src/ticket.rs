//! Read-only views of the collaborators a dispatch consults

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{InstanceId, TenantId, TicketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Whatsapp,
    Sms,
    /// Agent notes and other messages that never leave the system
    Internal,
}

impl ChannelKind {
    /// Whether outbound messages on this channel go through a broker
    #[must_use]
    pub const fn requires_live_dispatch(self) -> bool {
        !matches!(self, Self::Internal)
    }

    /// Whether the ticket's contact must carry a phone address
    #[must_use]
    pub const fn requires_address(self) -> bool {
        matches!(self, Self::Whatsapp | Self::Sms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default)]
    pub channel: ChannelKind,
    /// Instance the conversation is bound to, if any
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Ticket {
    /// The contact's phone number, ignoring blanks
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.contact
            .as_ref()
            .and_then(|contact| contact.phone.as_deref())
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Connecting,
    #[default]
    Disconnected,
}

/// A tenant's messaging session with a broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInstance {
    pub id: InstanceId,
    pub tenant_id: TenantId,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub state: ConnectionState,
}

fn default_provider() -> String {
    "broker".to_string()
}

impl ChannelInstance {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }
}
