//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - Expiry sweep: Removes expired entries from the in-memory store

mod cleanup;

pub use cleanup::spawn_cleanup_task;
