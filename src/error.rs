//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection configuration is missing or malformed
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Logical key is empty or whitespace-only
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Expiration is below one millisecond or above the accepted maximum
    #[error("Invalid expiration: {0}")]
    InvalidExpiration(String),

    /// Backing store is unreachable or refused the connection
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Backing store rejected or timed out a command
    #[error("Store command failed: {0}")]
    Store(String),

    /// Value could not be turned into a payload
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Stored payload could not be turned back into the requested type
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Admin command issued while `allowAdmin` is off
    #[error("Admin commands are disabled for this connection")]
    AdminDisabled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns true when the error means the connection itself is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, CacheError::Connection(_))
    }
}

// == Redis Conversion ==
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_io_error()
            || err.is_timeout()
        {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Store(err.to_string())
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;
