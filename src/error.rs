//! Error types for catalog-harvester
//!
//! A single [`Error`] enum covers every failure the pipeline can surface.
//! Most of them never escape a single item: the fetcher turns a failed primary
//! call into "item unavailable", enrichment failures become
//! [`SkipReason`](crate::types::SkipReason)s, and sink failures are logged and
//! dropped. Only configuration and orchestration failures reach the caller of
//! [`Harvester::run`](crate::harvester::Harvester::run).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for catalog-harvester operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for catalog-harvester
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "dispatch.batch_size")
        key: Option<String>,
    },

    /// Transport-level failure (connect, timeout, body decode)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote service answered with a status other than 200
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Status code returned by the server
        status: u16,
    },

    /// The response body parsed but did not have the expected shape
    #[error("invalid payload from {url}: {reason}")]
    InvalidPayload {
        /// Requested URL
        url: String,
        /// What was wrong with the body
        reason: String,
    },

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// XML read or write error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An output file exists but cannot be merged with
    #[error("sink error at {path}: {reason}")]
    Sink {
        /// The output file
        path: PathBuf,
        /// Why the existing content was rejected
        reason: String,
    },

    /// The dispatch task failed or panicked
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Config`] tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// HTTP status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error represents a request timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout(),
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}
