//! Redis Store Module
//!
//! Standalone and cluster connections to a Redis-compatible server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, ConnectionInfo, FromRedisValue, IntoConnectionInfo};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Connector, StoreConnection};
use crate::error::{CacheError, Result};

/// Builds connection info for one `host:port` endpoint.
fn connection_info(
    endpoint: &str,
    config: &ConnectionConfig,
    database: i64,
) -> Result<ConnectionInfo> {
    let mut info = format!("redis://{}", endpoint)
        .into_connection_info()
        .map_err(|e| CacheError::Configuration(format!("invalid endpoint '{}': {}", endpoint, e)))?;
    info.redis.db = database;
    info.redis.password = config.password.clone();
    Ok(info)
}

/// Expiration as the whole milliseconds `PX`/`PEXPIRE` expect, saturating.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

enum RedisHandle {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

// == Redis Connection ==
/// One multiplexed handle shared by every cache operation.
pub struct RedisConnection {
    handle: RedisHandle,
    connected: AtomicBool,
    allow_admin: bool,
    sync_timeout: Duration,
}

impl RedisConnection {
    fn new(handle: RedisHandle, config: &ConnectionConfig) -> Self {
        Self {
            handle,
            connected: AtomicBool::new(true),
            allow_admin: config.allow_admin,
            sync_timeout: config.sync_timeout(),
        }
    }

    /// Runs one command under the sync timeout. Connection-level failures
    /// mark the handle disconnected so the manager replaces it.
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let request = async {
            match &self.handle {
                RedisHandle::Standalone(conn) => cmd.query_async::<T>(&mut conn.clone()).await,
                RedisHandle::Cluster(conn) => cmd.query_async::<T>(&mut conn.clone()).await,
            }
        };

        let err = match timeout(self.sync_timeout, request).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => CacheError::from(e),
            Err(_) => CacheError::Store(format!(
                "command timed out after {} ms",
                self.sync_timeout.as_millis()
            )),
        };

        if err.is_connection_error() && self.connected.swap(false, Ordering::SeqCst) {
            warn!(error = %err, "Redis connection dropped");
        }
        Err(err)
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = self
            .query(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl_millis(ttl)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = self
            .query(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let found: i64 = self.query(redis::cmd("EXISTS").arg(key)).await?;
        Ok(found > 0)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.query(redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        // The reply counts newly created fields; overwriting one is still a success
        let _added: i64 = self
            .query(redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await?;
        Ok(true)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let removed: i64 = self.query(redis::cmd("HDEL").arg(key).arg(field)).await?;
        Ok(removed > 0)
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        let found: i64 = self.query(redis::cmd("HEXISTS").arg(key).arg(field)).await?;
        Ok(found > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let applied: i64 = self
            .query(redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)))
            .await?;
        Ok(applied == 1)
    }

    async fn flush_database(&self) -> Result<()> {
        if !self.allow_admin {
            return Err(CacheError::AdminDisabled);
        }
        self.query::<()>(&redis::cmd("FLUSHDB")).await
    }
}

// == Redis Connector ==
/// Connects to the configured endpoints, retrying whole rounds
/// `connect_retry` times before giving up.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect_once(&self, config: &ConnectionConfig) -> Result<RedisHandle> {
        let endpoints = config.endpoints();
        let connect_timeout = config.connect_timeout();
        let timed_out = || {
            CacheError::Connection(format!(
                "connect timed out after {} ms",
                connect_timeout.as_millis()
            ))
        };

        if config.is_cluster {
            let nodes = endpoints
                .iter()
                .map(|endpoint| connection_info(endpoint, config, 0))
                .collect::<Result<Vec<_>>>()?;

            let mut builder = ClusterClient::builder(nodes).retries(config.connect_retry);
            if let Some(password) = &config.password {
                builder = builder.password(password.clone());
            }
            let client = builder.build()?;

            let conn = timeout(connect_timeout, client.get_async_connection())
                .await
                .map_err(|_| timed_out())??;
            return Ok(RedisHandle::Cluster(conn));
        }

        let mut last_error = None;
        for endpoint in &endpoints {
            let client = redis::Client::open(connection_info(endpoint, config, config.database)?)?;
            match timeout(connect_timeout, client.get_multiplexed_async_connection()).await {
                Ok(Ok(conn)) => {
                    debug!(endpoint = %endpoint, "Connected to Redis endpoint");
                    return Ok(RedisHandle::Standalone(conn));
                }
                Ok(Err(e)) => {
                    debug!(endpoint = %endpoint, error = %e, "Redis endpoint refused connection");
                    last_error = Some(CacheError::from(e));
                }
                Err(_) => {
                    debug!(endpoint = %endpoint, "Redis endpoint timed out");
                    last_error = Some(timed_out());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CacheError::Configuration("no endpoints configured".to_string())
        }))
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn StoreConnection>> {
        config.validate()?;
        let rounds = config.connect_retry + 1;

        let mut last_error = None;
        for round in 1..=rounds {
            match self.connect_once(config).await {
                Ok(handle) => {
                    info!(round, cluster = config.is_cluster, "Redis connection ready");
                    return Ok(Arc::new(RedisConnection::new(handle, config)));
                }
                Err(e @ CacheError::Configuration(_)) => return Err(e),
                Err(e) => {
                    warn!(round, rounds, error = %e, "Redis connect round failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .map(|e| CacheError::Connection(e.to_string()))
            .unwrap_or_else(|| CacheError::Connection("no connect attempt made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_info_carries_database_and_password() {
        let config = ConnectionConfig {
            password: Some("secret".to_string()),
            ..ConnectionConfig::default()
        };
        let info = connection_info("cache.internal:6380", &config, 3).unwrap();

        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
        assert_eq!(
            info.addr,
            redis::ConnectionAddr::Tcp("cache.internal".to_string(), 6380)
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_with_connection_error() {
        let config = ConnectionConfig {
            host_and_ports: "127.0.0.1:1".to_string(),
            connect_retry: 1,
            connect_timeout: 200,
            ..ConnectionConfig::default()
        };

        let result = RedisConnector::new().connect(&config).await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn test_live_round_trip() {
        let conn = RedisConnector::new()
            .connect(&ConnectionConfig::default())
            .await
            .unwrap();

        assert!(conn.set("distributed_cache:test", "v", Duration::from_secs(5)).await.unwrap());
        assert_eq!(
            conn.get("distributed_cache:test").await.unwrap(),
            Some("v".to_string())
        );
        assert!(conn.delete("distributed_cache:test").await.unwrap());
        assert!(conn.is_connected());
    }
}
