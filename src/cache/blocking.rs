//! Blocking Cache Module
//!
//! Synchronous front end for callers without an async runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::{Builder, Runtime};

use crate::cache::codec::SerializerOptions;
use crate::cache::engine::Cache;
use crate::cache::key::Namespace;
use crate::cache::stats::CacheStats;
use crate::config::CacheOptions;
use crate::connection::Connector;
use crate::error::{CacheError, Result};

// == Blocking Cache ==
/// Runs every [`Cache`] operation to completion on a private runtime,
/// blocking the calling thread for the network round trip.
///
/// Must not be called, created or dropped from inside an async context.
pub struct BlockingCache {
    inner: Cache,
    runtime: Runtime,
}

impl BlockingCache {
    pub fn new(options: CacheOptions, connector: Arc<dyn Connector>) -> Result<Self> {
        Ok(Self {
            inner: Cache::new(options, connector)?,
            runtime: build_runtime()?,
        })
    }

    /// Lazily connected blocking cache backed by Redis.
    pub fn redis(options: CacheOptions) -> Result<Self> {
        Ok(Self {
            inner: Cache::redis(options)?,
            runtime: build_runtime()?,
        })
    }

    /// Builds the cache and connects before returning.
    pub fn connect(options: CacheOptions, connector: Arc<dyn Connector>) -> Result<Self> {
        let cache = Self::new(options, connector)?;
        cache.block_on(cache.inner.connection_manager().connection())?;
        Ok(cache)
    }

    pub fn namespace(&self) -> &Namespace {
        self.inner.namespace()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// The async cache this wraps.
    pub fn as_async(&self) -> &Cache {
        &self.inner
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    // == Plain Keys ==
    pub fn get_or_set<T, F>(
        &self,
        key: &str,
        producer: F,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        self.block_on(self.inner.get_or_set(
            key,
            move || std::future::ready(producer()),
            ttl,
            serializer,
        ))
    }

    pub fn get<T>(&self, key: &str, serializer: Option<&SerializerOptions>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.block_on(self.inner.get(key, serializer))
    }

    pub fn set<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        self.block_on(self.inner.set(key, value, ttl, serializer))
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.block_on(self.inner.delete(key))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        self.block_on(self.inner.exists(key))
    }

    // == Hash Fields ==
    pub fn hash_get_or_set<T, F>(
        &self,
        key: &str,
        field: &str,
        producer: F,
        ttl: Option<Duration>,
        serializer: Option<&SerializerOptions>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        self.block_on(self.inner.hash_get_or_set(
            key,
            field,
            move || std::future::ready(producer()),
            ttl,
            serializer,
        ))
    }

    pub fn hash_get<T>(
        &self,
        key: &str,
        field: &str,
        serializer: Option<&SerializerOptions>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.block_on(self.inner.hash_get(key, field, serializer))
    }

    pub fn hash_set<T>(
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
        self.block_on(self.inner.hash_set(key, field, value, ttl, serializer))
    }

    pub fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        self.block_on(self.inner.hash_delete(key, field))
    }

    pub fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        self.block_on(self.inner.hash_exists(key, field))
    }

    pub fn flush_database(&self) -> Result<()> {
        self.block_on(self.inner.flush_database())
    }
}

/// One worker keeps connection driver tasks running between calls.
fn build_runtime() -> Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("distributed-cache-blocking")
        .enable_all()
        .build()
        .map_err(|e| CacheError::Internal(format!("failed to start blocking runtime: {}", e)))
}
