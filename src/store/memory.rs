//! In-Memory Store Module
//!
//! A process-local stand-in for the networked store. Same key topology and
//! expiry rules, plus the hooks tests need to observe and disturb connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::entry::{StoreEntry, StoredValue};
use crate::config::ConnectionConfig;
use crate::connection::{Connector, StoreConnection};
use crate::error::{CacheError, Result};

fn wrong_type(key: &str) -> CacheError {
    CacheError::Store(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// Injected misbehavior of the expiry command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireFault {
    /// The command fails with a store error
    Reject,
    /// The command reports that the key does not exist
    KeyMissing,
}

// == Memory Store ==
/// Shared key space with lazy expiry on access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoreEntry>>,
    /// Commands served, for spying on the cache engine
    commands: AtomicU64,
    expire_fault: Mutex<Option<ExpireFault>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands served since creation.
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.commands.fetch_add(1, Ordering::SeqCst);
    }

    /// Runs `f` on the live entry for `key`, dropping it first if expired.
    fn with_live<R>(&self, key: &str, f: impl FnOnce(Option<&mut StoreEntry>) -> R) -> R {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(StoreEntry::is_expired) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    // == String Keys ==
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.count();
        self.with_live(key, |entry| match entry.map(|e| &e.value) {
            None => Ok(None),
            Some(StoredValue::Text(value)) => Ok(Some(value.clone())),
            Some(StoredValue::Fields(_)) => Err(wrong_type(key)),
        })
    }

    /// Overwrites any previous value, whatever its shape.
    pub fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.count();
        let entry = StoreEntry::new(StoredValue::Text(value.to_string()), Some(ttl));
        self.entries.lock().insert(key.to_string(), entry);
        Ok(true)
    }

    pub fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.count();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| !e.is_expired()) {
            return Ok(false);
        }
        let entry = StoreEntry::new(StoredValue::Text(value.to_string()), Some(ttl));
        entries.insert(key.to_string(), entry);
        Ok(true)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.count();
        let mut entries = self.entries.lock();
        Ok(entries.remove(key).is_some_and(|e| !e.is_expired()))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        self.count();
        Ok(self.with_live(key, |entry| entry.is_some()))
    }

    // == Hash Keys ==
    pub fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.count();
        self.with_live(key, |entry| match entry.map(|e| &e.value) {
            None => Ok(None),
            Some(StoredValue::Fields(fields)) => Ok(fields.get(field).cloned()),
            Some(StoredValue::Text(_)) => Err(wrong_type(key)),
        })
    }

    /// Writes one field. A new key is created without expiration.
    pub fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.count();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(StoreEntry::is_expired) {
            entries.remove(key);
        }

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry::new(StoredValue::Fields(HashMap::new()), None));
        match &mut entry.value {
            StoredValue::Fields(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(true)
            }
            StoredValue::Text(_) => Err(wrong_type(key)),
        }
    }

    /// Removes one field; the key goes away with its last field.
    pub fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        self.count();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(StoreEntry::is_expired) {
            entries.remove(key);
        }

        let (removed, now_empty) = match entries.get_mut(key).map(|e| &mut e.value) {
            None => (false, false),
            Some(StoredValue::Fields(fields)) => {
                let removed = fields.remove(field).is_some();
                (removed, fields.is_empty())
            }
            Some(StoredValue::Text(_)) => return Err(wrong_type(key)),
        };

        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    pub fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        self.count();
        self.with_live(key, |entry| match entry.map(|e| &e.value) {
            None => Ok(false),
            Some(StoredValue::Fields(fields)) => Ok(fields.contains_key(field)),
            Some(StoredValue::Text(_)) => Err(wrong_type(key)),
        })
    }

    // == Expiry ==
    /// Makes every later `expire` misbehave as `fault`; `None` restores it.
    pub fn set_expire_fault(&self, fault: Option<ExpireFault>) {
        *self.expire_fault.lock() = fault;
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.count();
        let fault = *self.expire_fault.lock();
        match fault {
            Some(ExpireFault::Reject) => {
                return Err(CacheError::Store(format!("PEXPIRE rejected for '{}'", key)))
            }
            Some(ExpireFault::KeyMissing) => return Ok(false),
            None => {}
        }
        Ok(self.with_live(key, |entry| match entry {
            Some(entry) => {
                entry.expire_in(ttl);
                true
            }
            None => false,
        }))
    }

    /// Remaining lifetime of `key`, if it exists and has an expiration.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.with_live(key, |entry| {
            entry
                .and_then(|e| e.ttl_remaining_ms())
                .map(Duration::from_millis)
        })
    }

    pub fn flush(&self) {
        self.count();
        self.entries.lock().clear();
    }

    // == Cleanup Expired ==
    /// Removes all expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// Number of stored keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// == Memory Connection ==
/// Handle onto a [`MemoryStore`] that can be severed.
#[derive(Debug)]
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    connected: AtomicBool,
    allow_admin: bool,
}

impl MemoryConnection {
    fn new(store: Arc<MemoryStore>, allow_admin: bool) -> Self {
        Self {
            store,
            connected: AtomicBool::new(true),
            allow_admin,
        }
    }

    /// Marks the handle as dropped; every later command fails.
    pub fn sever(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn live(&self) -> Result<&MemoryStore> {
        if self.is_connected() {
            Ok(self.store.as_ref())
        } else {
            Err(CacheError::Connection("connection closed".to_string()))
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.live()?.get(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.live()?.set(key, value, ttl)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.live()?.set_if_absent(key, value, ttl)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.live()?.delete(key)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.live()?.exists(key)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.live()?.hash_get(key, field)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.live()?.hash_set(key, field, value)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        self.live()?.hash_delete(key, field)
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        self.live()?.hash_exists(key, field)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.live()?.expire(key, ttl)
    }

    async fn flush_database(&self) -> Result<()> {
        if !self.allow_admin {
            return Err(CacheError::AdminDisabled);
        }
        self.live()?.flush();
        Ok(())
    }
}

// == Memory Connector ==
/// Hands out connections to one shared [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    attempts: AtomicUsize,
    refuse: AtomicBool,
    connect_delay: Option<Duration>,
    issued: Mutex<Vec<Arc<MemoryConnection>>>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            attempts: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            connect_delay: None,
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Makes every connect attempt wait before completing.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Number of connect attempts, successful or not.
    pub fn connect_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// While set, connect attempts fail as if the store were unreachable.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Drops every connection handed out so far.
    pub fn sever_all(&self) {
        for conn in self.issued.lock().iter() {
            conn.sever();
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn StoreConnection>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        if self.refuse.load(Ordering::SeqCst) {
            return Err(CacheError::Connection(format!(
                "store unreachable at {}",
                config.host_and_ports
            )));
        }

        let conn = Arc::new(MemoryConnection::new(
            Arc::clone(&self.store),
            config.allow_admin,
        ));
        self.issued.lock().push(Arc::clone(&conn));
        debug!(attempt, "Memory store connection issued");
        Ok(conn)
    }
}
