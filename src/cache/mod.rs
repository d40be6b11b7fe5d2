//! Cache Module
//!
//! Namespaced cache-aside access over a remote key-value store.

mod blocking;
mod codec;
mod engine;
mod key;
mod stats;
mod tree;


// Re-export public types
pub use blocking::BlockingCache;
pub use codec::{JsonCodec, PayloadCodec, SerializerOptions, ValueCodec};
pub use engine::Cache;
pub use key::{Namespace, KEY_SEPARATOR};
pub use stats::CacheStats;
