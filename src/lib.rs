//! Distributed Cache - A cache-aside layer over a remote key-value store
//!
//! Provides namespaced get-or-set access to plain keys and hash fields, with
//! expiration, pluggable serialization and a lazily created, self-healing
//! shared connection.

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod store;
pub mod tasks;

pub use cache::{BlockingCache, Cache, CacheStats, Namespace, SerializerOptions};
pub use config::{CacheOptions, ConnectionConfig};
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
