//! Error types for cdnmirror_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using cdnmirror_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching, verifying and materializing objects.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Hash string is not well-formed hex of the expected shape.
    #[error("Malformed hash {hash:?}: {reason}")]
    MalformedHash { hash: String, reason: String },

    /// Transport-level failure (connect, timeout, unexpected status).
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The server reported the object as absent.
    #[error("Not found: {url}")]
    NotFound { url: String },

    /// Downloaded bytes do not hash to the requested content hash.
    #[error("Integrity error: expected {hash}, got {actual}")]
    Integrity { hash: String, actual: String },

    /// Block index structure is invalid.
    #[error("Invalid index {hash}: {source}")]
    Validation {
        hash: String,
        #[source]
        source: ValidationError,
    },

    /// Catalog document is not valid JSON of the expected shape.
    #[error("Invalid catalog document {hash}: {source}")]
    Json {
        hash: String,
        #[source]
        source: serde_json::Error,
    },

    /// Config document could not be parsed.
    #[error("Config parse error on line {line}: {reason}")]
    ConfigParse { line: usize, reason: String },

    /// Product table could not be parsed.
    #[error("Table parse error on line {line}: {reason}")]
    TableParse { line: usize, reason: String },

    /// Manifest link name would escape the link root.
    #[error("Invalid link name {name:?}: {reason}")]
    InvalidLink { name: String, reason: String },

    /// CDN path prefix would place the cache outside its namespace.
    #[error("Invalid remote path {path:?}: {reason}")]
    InvalidRemotePath { path: String, reason: String },

    /// URL could not be mapped to a local file.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No CDN host is known for a store.
    #[error("No CDN available: {reason}")]
    NoCdn { reason: String },

    /// Config document lacks a required key.
    #[error("Missing config key: {key}")]
    MissingKey { key: String },

    /// Local path exists but is not what the store expects.
    #[error("Unexpected entry at {path}: {reason}")]
    UnexpectedEntry { path: PathBuf, reason: String },
}

/// Structural failures found by the index validator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Buffer is shorter than the trailer-declared layout requires.
    #[error("buffer too short: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    /// Truncated digest of the entry-record region differs from the trailer.
    #[error("entry region checksum mismatch: trailer has {expected}, computed {actual}")]
    EntryRegionChecksumMismatch { expected: String, actual: String },

    /// Truncated digest of a data block differs from its entry record.
    #[error("block {block} checksum mismatch")]
    BlockChecksumMismatch { block: usize },
}

impl Error {
    /// Create a MalformedHash error.
    pub fn malformed_hash(hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedHash {
            hash: hash.into(),
            reason: reason.into(),
        }
    }

    /// Create a Network error.
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(url: impl Into<String>) -> Self {
        Error::NotFound { url: url.into() }
    }

    /// Create an Integrity error.
    pub fn integrity(hash: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::Integrity {
            hash: hash.into(),
            actual: actual.into(),
        }
    }

    /// Create a Validation error for the index identified by `hash`.
    pub fn validation(hash: impl Into<String>, source: ValidationError) -> Self {
        Error::Validation {
            hash: hash.into(),
            source,
        }
    }

    /// Create a Json error for the document identified by `hash`.
    pub fn json(hash: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Json {
            hash: hash.into(),
            source,
        }
    }

    /// Create a ConfigParse error.
    pub fn config_parse(line: usize, reason: impl Into<String>) -> Self {
        Error::ConfigParse {
            line,
            reason: reason.into(),
        }
    }

    /// Create a TableParse error.
    pub fn table_parse(line: usize, reason: impl Into<String>) -> Self {
        Error::TableParse {
            line,
            reason: reason.into(),
        }
    }

    /// Create an InvalidLink error.
    pub fn invalid_link(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidLink {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidRemotePath error.
    pub fn invalid_remote_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidRemotePath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidUrl error.
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a NoCdn error.
    pub fn no_cdn(reason: impl Into<String>) -> Self {
        Error::NoCdn {
            reason: reason.into(),
        }
    }

    /// Create a MissingKey error.
    pub fn missing_key(key: impl Into<String>) -> Self {
        Error::MissingKey { key: key.into() }
    }

    /// Create an UnexpectedEntry error.
    pub fn unexpected_entry(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::UnexpectedEntry {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the "absent" signal, as opposed to a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for transient failures another host might not have.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::NotFound { .. })
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct_from_network() {
        let nf = Error::not_found("http://cdn/x");
        let net = Error::network("http://cdn/x", "connection refused");

        assert!(nf.is_not_found());
        assert!(!net.is_not_found());
        assert!(nf.is_retryable());
        assert!(net.is_retryable());
    }

    #[test]
    fn test_integrity_is_not_retryable() {
        let err = Error::integrity("aa", "bb");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Integrity error: expected aa, got bb");
    }

    #[test]
    fn test_validation_message_names_block() {
        let err = Error::validation("abcd", ValidationError::BlockChecksumMismatch { block: 3 });
        assert!(err.to_string().contains("block 3"));
    }
}
