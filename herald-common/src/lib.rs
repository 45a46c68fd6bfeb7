//! Types shared by every herald crate: identifiers, the message record and
//! its status machine, collaborator views of tickets and channel instances,
//! the clock abstraction and logging setup.

pub mod clock;
pub mod code;
pub mod ids;
pub mod logging;
pub mod message;
pub mod status;
pub mod ticket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use code::ErrorCode;
pub use ids::{InstanceId, MessageId, ParseIdError, TenantId, TicketId};
pub use message::{
    BrokerDiagnostic, BrokerErrorDiagnostic, ContactCard, Location, Media, Message,
    MessageContent, MessageMetadata, NewMessage, Template,
};
pub use status::{Direction, MessageStatus};
pub use ticket::{ChannelInstance, ChannelKind, ConnectionState, Contact, Ticket};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
