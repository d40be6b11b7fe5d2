//! Connection Module
//!
//! The seam between the cache engine and the backing store, plus the manager
//! that owns the single shared connection.

mod manager;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::Result;

pub use manager::ConnectionManager;

// == Store Connection ==
/// A live connection to the backing store.
///
/// Keys passed here are already physical keys.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Whether the handle can still serve commands.
    fn is_connected(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value` with an expiration; returns the store's success flag.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Writes only when `key` is absent; returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Writes one field; returns the store's success flag.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool>;

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool>;

    /// Sets the expiration of the whole key; false when the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Drops every key in the selected database. Admin only.
    async fn flush_database(&self) -> Result<()>;
}

// == Connector ==
/// Establishes new connections. Retry policy lives here, not in the manager.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn StoreConnection>>;
}
