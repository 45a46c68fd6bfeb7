//! Message persistence for herald
//!
//! The [`Ledger`] records outbound and inbound messages idempotently on top of
//! a [`MessageStore`]; the [`Directory`] gives read access to the tickets and
//! channel instances a dispatch consults.

pub mod backends;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod store;

pub use backends::{MemoryMessageStore, TestMessageStore};
pub use directory::{Directory, MemoryDirectory};
pub use error::{Constraint, LedgerError, Result, StoreError};
pub use ledger::{Ledger, Recorded};
pub use store::{MessageStore, StoreResult};
