//! Key Codec Module
//!
//! Maps logical keys onto namespaced physical keys.

use std::fmt;

use crate::config::NAMESPACE_DOMAIN_SUFFIX;
use crate::error::{CacheError, Result};

/// Separator between the namespace and the logical key.
pub const KEY_SEPARATOR: char = ':';

// == Namespace ==
/// Fixed prefix isolating one cache's keys from others on the same store.
///
/// The separator is not escaped: a logical key containing `:` is passed
/// through as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }

    /// Derives `{environment}.ares.com` with the environment lower-cased.
    pub fn for_environment(environment: &str) -> Self {
        Self(format!(
            "{}{}",
            environment.to_lowercase(),
            NAMESPACE_DOMAIN_SUFFIX
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // == Physical Key ==
    /// Builds `{namespace}:{logical_key}`.
    ///
    /// Fails with `InvalidKey` for an empty or whitespace-only key.
    pub fn physical_key(&self, logical_key: &str) -> Result<String> {
        if logical_key.trim().is_empty() {
            return Err(CacheError::InvalidKey(
                "key cannot be null, empty or whitespace".to_string(),
            ));
        }
        Ok(format!("{}{}{}", self.0, KEY_SEPARATOR, logical_key))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_key() {
        let ns = Namespace::new("prod.example.com");
        assert_eq!(
            ns.physical_key("session:42").unwrap(),
            "prod.example.com:session:42"
        );
    }

    #[test]
    fn test_for_environment_lowercases() {
        let ns = Namespace::for_environment("Staging");
        assert_eq!(ns.as_str(), "staging.ares.com");
        assert_eq!(ns.to_string(), "staging.ares.com");
    }

    #[test]
    fn test_blank_keys_rejected() {
        let ns = Namespace::new("test");
        for key in ["", " ", "\t\n"] {
            assert!(matches!(ns.physical_key(key), Err(CacheError::InvalidKey(_))));
        }
    }

    #[test]
    fn test_key_with_surrounding_spaces_kept_verbatim() {
        let ns = Namespace::new("test");
        assert_eq!(ns.physical_key(" a ").unwrap(), "test: a ");
    }
}
