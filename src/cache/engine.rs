//! Cache Engine Module
//!
//! Get, set, delete, exists and get-or-set over plain keys and hash fields.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::cache::codec::{PayloadCodec, SerializerOptions, ValueCodec};
use crate::cache::key::Namespace;
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::config::{check_expiration, CacheOptions};
use crate::connection::{ConnectionManager, Connector, StoreConnection};
use crate::error::Result;
use crate::store::RedisConnector;

/// Pause between reads while another caller holds the populate marker.
const POPULATE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Suffix of the marker key taken by the opt-in populate lock.
const POPULATE_MARKER_SUFFIX: &str = "populate-lock";

// == Cache ==
/// Namespaced cache-aside access to the backing store.
///
/// Cloning is cheap; clones share the connection and the statistics.
///
/// # Concurrency
/// No lock guards a miss. Two callers that both observe a miss for the same
/// key may both run their producer and both write; the last write wins. The
/// producer runs at most once per observed miss, not once per key. Enable
/// [`CacheOptions::with_populate_lock`] for a best-effort single populate.
#[derive(Clone)]
pub struct Cache {
    namespace: Namespace,
    codec: ValueCodec,
    connections: Arc<ConnectionManager>,
    default_expiration: Duration,
    populate_lock: Option<Duration>,
    stats: Arc<StatsRecorder>,
}

impl Cache {
    // == Constructors ==
    /// Builds a cache without connecting. The first operation connects.
    pub fn new(options: CacheOptions, connector: Arc<dyn Connector>) -> Result<Self> {
        options.validate()?;
        let connections = Arc::new(ConnectionManager::new(options.connection.clone(), connector));
        Ok(Self::assemble(options, connections))
    }

    /// Builds a cache over an existing connection manager, sharing its connection.
    pub fn with_connection_manager(
        options: CacheOptions,
        connections: Arc<ConnectionManager>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self::assemble(options, connections))
    }

    /// Lazily connected cache backed by Redis.
    pub fn redis(options: CacheOptions) -> Result<Self> {
        Self::new(options, Arc::new(RedisConnector::new()))
    }

    /// Builds a cache and establishes its connection before returning.
    pub async fn connect(options: CacheOptions, connector: Arc<dyn Connector>) -> Result<Self> {
        let cache = Self::new(options, connector)?;
        cache.connections.connection().await?;
        Ok(cache)
    }

    fn assemble(options: CacheOptions, connections: Arc<ConnectionManager>) -> Self {
        Self {
            namespace: Namespace::new(options.namespace),
            codec: ValueCodec::new(options.serializer),
            connections,
            default_expiration: options.default_expiration,
            populate_lock: options.populate_lock,
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    /// Replaces the payload format, keeping the default serialization policy.
    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = ValueCodec::with_codec(codec, self.codec.defaults().clone());
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    // == Plain Keys ==
    /// Returns the cached value, computing and storing it on a miss.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        producer: F,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.get_or_populate(key, None, producer, ttl, serializer).await
    }

    /// Reads a value. `Ok(None)` is a miss; a malformed payload is an error.
    pub async fn get<T>(
        &self,
        key: &str,
        serializer: Option<&SerializerOptions>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let physical = self.namespace.physical_key(key)?;
        let value = self.read(&physical, None, serializer).await?;
        self.record_lookup(&physical, None, value.is_some());
        Ok(value)
    }

    /// Writes a value with an expiration. `Ok(false)` when nothing was written.
    pub async fn set<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let physical = self.namespace.physical_key(key)?;
        self.write(&physical, None, value, ttl, serializer).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let physical = self.namespace.physical_key(key)?;
        self.connection().await?.delete(&physical).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let physical = self.namespace.physical_key(key)?;
        self.connection().await?.exists(&physical).await
    }

    // == Hash Fields ==
    /// Field-scoped [`Cache::get_or_set`]. The expiration covers the whole key.
    pub async fn hash_get_or_set<T, F, Fut>(
        &self,
        key: &str,
        field: &str,
        producer: F,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.get_or_populate(key, Some(field), producer, ttl, serializer).await
    }

    pub async fn hash_get<T>(
        &self,
        key: &str,
        field: &str,
        serializer: Option<&SerializerOptions>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let physical = self.namespace.physical_key(key)?;
        let value = self.read(&physical, Some(field), serializer).await?;
        self.record_lookup(&physical, Some(field), value.is_some());
        Ok(value)
    }

    /// Writes one field, then resets the whole key's expiration to `ttl`.
    ///
    /// A refresh that errors propagates the error; a refresh that finds the
    /// key gone yields `Ok(false)`. Either way the field itself was written.
    pub async fn hash_set<T>(
        &self,
        key: &str,
        field: &str,
        value: &T,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let physical = self.namespace.physical_key(key)?;
        self.write(&physical, Some(field), value, ttl, serializer).await
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let physical = self.namespace.physical_key(key)?;
        self.connection().await?.hash_delete(&physical, field).await
    }

    pub async fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        let physical = self.namespace.physical_key(key)?;
        self.connection().await?.hash_exists(&physical, field).await
    }

    // == Admin ==
    /// Drops every key in the selected database, not only this namespace.
    pub async fn flush_database(&self) -> Result<()> {
        warn!(namespace = %self.namespace, "Flushing backing store database");
        self.connection().await?.flush_database().await
    }

    // == Internals ==
    async fn connection(&self) -> Result<Arc<dyn StoreConnection>> {
        self.connections.connection().await
    }

    /// Resolves the expiration for a write, rejecting ones the store cannot hold.
    fn expiration(&self, ttl: Option<Duration>) -> Result<Duration> {
        check_expiration(ttl.unwrap_or(self.default_expiration))
    }

    fn record_lookup(&self, physical: &str, field: Option<&str>, hit: bool) {
        if hit {
            self.stats.record_hit();
            trace!(key = %physical, field, "Cache hit");
        } else {
            self.stats.record_miss();
            trace!(key = %physical, field, "Cache miss");
        }
    }

    async fn read<T>(
        &self,
        physical: &str,
        field: Option<&str>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let conn = self.connection().await?;
        let payload = match field {
            Some(field) => conn.hash_get(physical, field).await?,
            None => conn.get(physical).await?,
        };

        match payload {
            Some(payload) if !payload.is_empty() => {
                self.codec.deserialize(&payload, serializer).map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn write<T>(
        &self,
        physical: &str,
        field: Option<&str>,
        value: &T,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let ttl = self.expiration(ttl)?;
        let payload = self.codec.serialize(value, serializer)?;
        if payload.is_empty() {
            self.stats.record_skipped_write();
            warn!(key = %physical, field, "Serialized payload is empty, skipping write");
            return Ok(false);
        }

        let conn = self.connection().await?;
        self.stats.record_write();

        let Some(field) = field else {
            return conn.set(physical, &payload, ttl).await;
        };

        if !conn.hash_set(physical, field, &payload).await? {
            return Ok(false);
        }

        match conn.expire(physical, ttl).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(key = %physical, field, "Expiry refresh found no key after field write");
                Ok(false)
            }
            Err(e) => {
                warn!(
                    key = %physical,
                    field,
                    error = %e,
                    "Expiry refresh failed after field write"
                );
                Err(e)
            }
        }
    }

    async fn get_or_populate<T, F, Fut>(
        &self,
        key: &str,
        field: Option<&str>,
        producer: F,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let physical = self.namespace.physical_key(key)?;
        self.expiration(ttl)?;

        let cached = self.read(&physical, field, serializer).await?;
        self.record_lookup(&physical, field, cached.is_some());
        if let Some(value) = cached {
            return Ok(value);
        }

        let Some(lock_ttl) = self.populate_lock else {
            return self.populate(&physical, field, producer, ttl, serializer).await;
        };

        let marker = populate_marker(&physical, field);
        if self
            .connection()
            .await?
            .set_if_absent(&marker, "1", lock_ttl)
            .await?
        {
            debug!(key = %physical, field, "Populate marker acquired");
            // The previous holder may have stored a value after our first read
            let result = match self.read(&physical, field, serializer).await {
                Ok(Some(value)) => Ok(value),
                Ok(None) => self.populate(&physical, field, producer, ttl, serializer).await,
                Err(e) => Err(e),
            };
            self.release_marker(&marker).await;
            return result;
        }

        debug!(key = %physical, field, "Populate marker held elsewhere, waiting");
        if let Some(value) = self
            .wait_for_populate(&physical, field, &marker, lock_ttl, serializer)
            .await?
        {
            return Ok(value);
        }

        self.populate(&physical, field, producer, ttl, serializer).await
    }

    async fn populate<T, F, Fut>(
        &self,
        physical: &str,
        field: Option<&str>,
        producer: F,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.stats.record_populate();
        let value = producer().await;

        if !self.write(physical, field, &value, ttl, serializer).await? {
            debug!(key = %physical, field, "Produced value was not stored");
        }
        Ok(value)
    }

    /// Polls until the marker holder stores a value, the marker disappears, or
    /// the marker's lifetime runs out.
    async fn wait_for_populate<T>(
        &self,
        physical: &str,
        field: Option<&str>,
        marker: &str,
        lock_ttl: Duration,
        serializer: Option<&SerializerOptions>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let deadline = Instant::now() + lock_ttl;

        while Instant::now() < deadline {
            tokio::time::sleep(POPULATE_POLL_INTERVAL).await;

            if let Some(value) = self.read(physical, field, serializer).await? {
                return Ok(Some(value));
            }
            if !self.connection().await?.exists(marker).await? {
                // Holder finished without storing anything; one last look
                return self.read(physical, field, serializer).await;
            }
        }

        debug!(key = %physical, field, "Populate marker wait timed out");
        Ok(None)
    }

    async fn release_marker(&self, marker: &str) {
        let released = match self.connection().await {
            Ok(conn) => conn.delete(marker).await,
            Err(e) => Err(e),
        };
        if let Err(e) = released {
            warn!(marker = %marker, error = %e, "Failed to release populate marker");
        }
    }
}

fn populate_marker(physical: &str, field: Option<&str>) -> String {
    match field {
        Some(field) => format!("{}:{}:{}", physical, POPULATE_MARKER_SUFFIX, field),
        None => format!("{}:{}", physical, POPULATE_MARKER_SUFFIX),
    }
}
