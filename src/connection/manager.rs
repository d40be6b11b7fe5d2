//! Connection Manager
//!
//! Lazily creates the shared store connection and replaces it once it reports
//! itself disconnected.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Connector, StoreConnection};
use crate::config::ConnectionConfig;
use crate::error::Result;

// == Connection Manager ==
/// Owner of the one connection every cache operation shares.
///
/// At most one connect attempt runs at a time. Callers see either the
/// existing healthy handle or the freshly created one. A failed connect leaves
/// the slot empty so the next caller repeats the whole sequence.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    /// Current handle; only replaced while `connect_lock` is held
    current: RwLock<Option<Arc<dyn StoreConnection>>>,
    connect_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            current: RwLock::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    // == Get Connection ==
    /// Returns a connected handle, connecting first if needed.
    pub async fn connection(&self) -> Result<Arc<dyn StoreConnection>> {
        if let Some(conn) = self.healthy() {
            return Ok(conn);
        }

        let _guard = self.connect_lock.lock().await;

        // Another caller may have repaired it while we waited
        if let Some(conn) = self.healthy() {
            return Ok(conn);
        }

        let stale = self.current.write().take();
        if stale.is_some() {
            debug!("Discarding disconnected store handle");
        }
        drop(stale);

        let endpoints = self.config.endpoints().join(",");
        info!(
            endpoints = %endpoints,
            cluster = self.config.is_cluster,
            "Connecting to backing store"
        );

        match self.connector.connect(&self.config).await {
            Ok(conn) => {
                *self.current.write() = Some(Arc::clone(&conn));
                info!(endpoints = %endpoints, "Backing store connection established");
                Ok(conn)
            }
            Err(e) => {
                warn!(endpoints = %endpoints, error = %e, "Backing store connection failed");
                Err(e)
            }
        }
    }

    /// Whether a connected handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.healthy().is_some()
    }

    fn healthy(&self) -> Option<Arc<dyn StoreConnection>> {
        self.current
            .read()
            .as_ref()
            .filter(|conn| conn.is_connected())
            .cloned()
    }
}
