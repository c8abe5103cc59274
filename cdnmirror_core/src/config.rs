//! Flat `key = value` config documents.
//!
//! ```text
//! # Build Configuration
//! root = 1e2c9d2bd6ba5c0e9a59ef5e1b5b5b5b
//! archives = 0017a402f556fbece46c38dc431a2c9b 0031e7a0b8e5bcd4e4a7a0b59e1a1b70
//! patch-config =
//! ```
//!
//! A value containing whitespace is a list of tokens; a key with nothing
//! after the `=` is an explicit null.

use crate::error::{Error, Result};
use crate::hash::ContentHash;
use indexmap::IndexMap;
use serde::Serialize;

/// One config value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// `key =`
    Null,
    /// `key = token`
    Scalar(String),
    /// `key = token token ...`
    List(Vec<String>),
}

impl ConfigValue {
    /// Tokens of the value; a scalar is a one-element list.
    pub fn tokens(&self) -> Vec<&str> {
        match self {
            ConfigValue::Null => Vec::new(),
            ConfigValue::Scalar(s) => vec![s.as_str()],
            ConfigValue::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// A parsed config document, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Config {
    entries: IndexMap<String, ConfigValue>,
}

impl Config {
    /// Parse a config document.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = IndexMap::new();

        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.matches('=').count() != 1 {
                return Err(Error::config_parse(line_no, "expected exactly one '='"));
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::config_parse(line_no, "missing '='"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::config_parse(line_no, "empty key"));
            }

            let tokens: Vec<&str> = value.split_whitespace().collect();
            let value = match tokens.as_slice() {
                [] => ConfigValue::Null,
                [single] => ConfigValue::Scalar(single.to_string()),
                many => ConfigValue::List(many.iter().map(|t| t.to_string()).collect()),
            };

            entries.insert(key.to_string(), value);
        }

        Ok(Self { entries })
    }

    /// Parse a config document from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::config_parse(0, format!("not UTF-8: {}", e)))?;
        Self::parse(text)
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    /// Get a scalar value, or the first token of a list.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.tokens().first().copied())
    }

    /// Get all tokens of a value; empty when absent or null.
    pub fn get_list(&self, key: &str) -> Vec<&str> {
        self.get(key).map(ConfigValue::tokens).unwrap_or_default()
    }

    /// Get every token of a value as a content hash.
    pub fn hashes(&self, key: &str) -> Result<Vec<ContentHash>> {
        self.get_list(key)
            .into_iter()
            .map(ContentHash::from_hex)
            .collect()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the document has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
