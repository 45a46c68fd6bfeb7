//! Message store implementations
//!
//! - `memory`: in-process store backed by `DashMap`
//! - `test`: memory store with synchronisation and fault hooks for tests

pub mod memory;

pub use memory::MemoryMessageStore;
pub use test::TestMessageStore;
