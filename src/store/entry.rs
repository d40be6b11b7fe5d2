//! Store Entry Module
//!
//! A single key in the in-memory store: a string or a field map, plus its expiry.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

// == Stored Value ==
/// The two value shapes a key can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    Text(String),
    Fields(HashMap<String, String>),
}

// == Store Entry ==
/// Represents a single key with value and expiry metadata.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub value: StoredValue,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<i64>,
}

impl StoreEntry {
    // == Constructor ==
    pub fn new(value: StoredValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(deadline_after),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches the expiration time.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }

    /// Replaces the expiration, counted from now.
    pub fn expire_in(&mut self, ttl: Duration) {
        self.expires_at = Some(deadline_after(ttl));
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at.map(|expires| {
            u64::try_from(expires.saturating_sub(current_timestamp_ms())).unwrap_or(0)
        })
    }
}

// == Utility Functions ==
/// Timestamp `ttl` from now, saturating instead of wrapping.
fn deadline_after(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    current_timestamp_ms().saturating_add(ttl_ms)
}

/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}
