//! Durable object store abstraction.
//!
//! The engine treats the store as the single source of truth for spec and
//! status. Writes are optimistic: a stale `resource_version` is rejected and
//! the caller re-reads.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use event::WatchEvent;
pub use memory::InMemoryStore;
pub use traits::ObjectStore;
