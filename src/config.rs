//! Configuration Module
//!
//! Connection settings for the backing store and the options a cache is built with.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{Namespace, SerializerOptions};
use crate::error::{CacheError, Result};

/// Suffix appended to environment names when deriving a namespace.
pub const NAMESPACE_DOMAIN_SUFFIX: &str = ".ares.com";

/// Expiration applied when a write does not name one.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// Longest expiration a write or populate marker accepts.
pub const MAX_EXPIRATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Checks that `ttl` is at least one millisecond and at most [`MAX_EXPIRATION`].
pub fn check_expiration(ttl: Duration) -> Result<Duration> {
    if ttl < Duration::from_millis(1) || ttl > MAX_EXPIRATION {
        return Err(CacheError::InvalidExpiration(format!(
            "{:?} is outside 1ms..={}s",
            ttl,
            MAX_EXPIRATION.as_secs()
        )));
    }
    Ok(ttl)
}

// == Connection Config ==
/// Connection parameters for the backing store.
///
/// Usually supplied as a JSON payload. Both `camelCase` and `PascalCase`
/// field names are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Comma-separated `host:port` list
    #[serde(alias = "HostAndPorts")]
    pub host_and_ports: String,
    #[serde(alias = "Password")]
    pub password: Option<String>,
    /// Permits admin commands such as flushing the database
    #[serde(alias = "AllowAdmin")]
    pub allow_admin: bool,
    /// Extra connect rounds after the first one fails
    #[serde(alias = "ConnectRetry")]
    pub connect_retry: u32,
    /// Connect timeout in milliseconds
    #[serde(alias = "ConnectTimeout")]
    pub connect_timeout: u64,
    /// Keepalive in seconds
    #[serde(alias = "KeepAlive")]
    pub keep_alive: u64,
    /// Per-command timeout in milliseconds
    #[serde(alias = "SyncTimeout")]
    pub sync_timeout: u64,
    #[serde(alias = "IsCluster")]
    pub is_cluster: bool,
    /// Logical database number, ignored in cluster mode
    #[serde(alias = "Database", alias = "DatabaseNumber")]
    pub database: i64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host_and_ports: "localhost:6379".to_string(),
            password: None,
            allow_admin: true,
            connect_retry: 3,
            connect_timeout: 10_000,
            keep_alive: 60,
            sync_timeout: 5_000,
            is_cluster: false,
            database: 0,
        }
    }
}

impl ConnectionConfig {
    /// Parses a JSON payload and validates it.
    pub fn from_json(payload: &str) -> Result<Self> {
        if payload.trim().is_empty() {
            return Err(CacheError::Configuration(
                "connection configuration must not be empty".to_string(),
            ));
        }

        let config: Self = serde_json::from_str(payload)
            .map_err(|e| CacheError::Configuration(format!("malformed payload: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the trimmed, non-empty endpoints in declaration order.
    pub fn endpoints(&self) -> Vec<String> {
        self.host_and_ports
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Checks the invariants a connection attempt relies on.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints().is_empty() {
            return Err(CacheError::Configuration(
                "at least one host:port endpoint is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive)
    }
}

// == Cache Options ==
/// Everything a cache instance is constructed from.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub connection: ConnectionConfig,
    /// Prefix isolating this cache's keys
    pub namespace: String,
    /// Serialization policy used when a call supplies no override
    pub serializer: SerializerOptions,
    /// Expiration used when a write supplies none
    pub default_expiration: Duration,
    /// Lifetime of the opt-in populate marker; `None` disables it
    pub populate_lock: Option<Duration>,
}

impl CacheOptions {
    pub fn new(connection: ConnectionConfig, namespace: impl Into<String>) -> Self {
        Self {
            connection,
            namespace: namespace.into(),
            serializer: SerializerOptions::default(),
            default_expiration: DEFAULT_EXPIRATION,
            populate_lock: None,
        }
    }

    /// Local defaults with a namespace derived from the environment name.
    pub fn for_environment(environment: &str) -> Self {
        Self::new(
            ConnectionConfig::default(),
            Namespace::for_environment(environment).as_str(),
        )
    }

    pub fn with_database(mut self, database: i64) -> Self {
        self.connection.database = database;
        self
    }

    pub fn with_serializer(mut self, serializer: SerializerOptions) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_default_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration = expiration;
        self
    }

    pub fn with_populate_lock(mut self, ttl: Duration) -> Self {
        self.populate_lock = Some(ttl);
        self
    }

    /// Creates options by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENVIRONMENT` - Environment name used to derive the namespace (default: development)
    /// - `CACHE_NAMESPACE` - Explicit namespace, overrides the derived one
    /// - `REDIS_CONFIGURATION` - JSON connection payload (default: local store)
    /// - `REDIS_DATABASE` - Logical database number (default: 0)
    /// - `CACHE_DEFAULT_EXPIRATION_MINUTES` - Default expiration (default: 60)
    pub fn from_env() -> Result<Self> {
        let environment =
            env::var("CACHE_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let connection = match env::var("REDIS_CONFIGURATION") {
            Ok(payload) => ConnectionConfig::from_json(&payload)?,
            Err(_) => ConnectionConfig::default(),
        };

        let namespace = env::var("CACHE_NAMESPACE")
            .ok()
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(|| Namespace::for_environment(&environment).as_str().to_string());

        let mut options = Self::new(connection, namespace);

        if let Some(database) = env::var("REDIS_DATABASE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            options = options.with_database(database);
        }

        if let Some(minutes) = env::var("CACHE_DEFAULT_EXPIRATION_MINUTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            let expiration = Duration::from_secs(minutes.saturating_mul(60));
            options = options.with_default_expiration(expiration);
        }

        Ok(options)
    }

    /// Validates the options once, at cache construction.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(CacheError::Configuration(
                "namespace must not be empty".to_string(),
            ));
        }
        check_expiration(self.default_expiration).map_err(|e| {
            CacheError::Configuration(format!("default expiration: {}", e))
        })?;
        if let Some(ttl) = self.populate_lock {
            check_expiration(ttl)
                .map_err(|e| CacheError::Configuration(format!("populate lock: {}", e)))?;
        }
        self.connection.validate()
    }
}
