//! Store Module
//!
//! Concrete backing stores behind the connection seam.
//!
//! # Stores
//! - `redis`: networked Redis, standalone or cluster
//! - `memory`: in-process store for tests and local development

mod entry;
mod memory;
mod redis;

pub use entry::{StoreEntry, StoredValue};
pub use memory::{ExpireFault, MemoryConnection, MemoryConnector, MemoryStore};
pub use self::redis::{RedisConnection, RedisConnector};
