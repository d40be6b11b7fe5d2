//! Value Codec Module
//!
//! Turns typed values into store payloads and back, under a serialization policy
//! that can be overridden per call.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::tree::to_tree;
use crate::error::{CacheError, Result};

// == Serializer Options ==
/// Serialization policy for payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializerOptions {
    /// Leave out struct fields that are `None` when writing
    pub ignore_null_values: bool,
    /// Emit indented JSON
    pub pretty: bool,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            ignore_null_values: true,
            pretty: false,
        }
    }
}

// == Payload Codec ==
/// Text format used on the wire.
///
/// Works on `serde_json::Value` so implementations stay object safe; the
/// typed conversion and the null-field policy happen in [`ValueCodec`].
pub trait PayloadCodec: Send + Sync + fmt::Debug {
    fn encode(&self, value: Value, options: &SerializerOptions) -> Result<String>;

    fn decode(&self, payload: &str, options: &SerializerOptions) -> Result<Value>;
}

/// JSON text payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, value: Value, options: &SerializerOptions) -> Result<String> {
        let encoded = if options.pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        };
        encoded.map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn decode(&self, payload: &str, _options: &SerializerOptions) -> Result<Value> {
        serde_json::from_str(payload).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

// == Value Codec ==
/// Typed front end over a [`PayloadCodec`] with a cache-wide default policy.
#[derive(Debug, Clone)]
pub struct ValueCodec {
    codec: Arc<dyn PayloadCodec>,
    defaults: SerializerOptions,
}

impl ValueCodec {
    pub fn new(defaults: SerializerOptions) -> Self {
        Self::with_codec(Arc::new(JsonCodec), defaults)
    }

    pub fn with_codec(codec: Arc<dyn PayloadCodec>, defaults: SerializerOptions) -> Self {
        Self { codec, defaults }
    }

    pub fn defaults(&self) -> &SerializerOptions {
        &self.defaults
    }

    /// Serializes `value`. An empty result is returned as-is; callers decide
    /// whether it is writable.
    pub fn serialize<T>(&self, value: &T, options: Option<&SerializerOptions>) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let options = options.unwrap_or(&self.defaults);
        let tree = to_tree(value, options.ignore_null_values)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.codec.encode(tree, options)
    }

    pub fn deserialize<T>(&self, payload: &str, options: Option<&SerializerOptions>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let tree = self.codec.decode(payload, options.unwrap_or(&self.defaults))?;
        serde_json::from_value(tree).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(SerializerOptions::default())
    }
}
