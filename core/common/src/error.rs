//! Common error types for Airweave connectors.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for connector sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration. Aborts the sync run.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failure, timeout or reset.
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Provider asked us to slow down.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials rejected, even after one refresh.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Feature not available on the account's tier (HTTP 402).
    #[error("Not entitled: {0}")]
    NotEntitled(String),

    /// Delta token or link no longer accepted by the provider.
    #[error("Delta token expired: {0}")]
    DeltaExpired(String),

    /// A provider item could not be understood.
    #[error("Unexpected payload: {0}")]
    Payload(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::RateLimited { .. } => true,
            Error::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Errors that must abort the whole sync run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Errors confined to a single provider item.
    pub fn is_item_level(&self) -> bool {
        matches!(self, Error::Payload(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("reset".to_string()).is_transient());
        assert!(Error::RateLimited { retry_after: None }.is_transient());
        assert!(Error::Http { status: 503, message: String::new() }.is_transient());
        assert!(!Error::Http { status: 404, message: String::new() }.is_transient());
        assert!(!Error::Authentication("bad token".to_string()).is_transient());
        assert!(!Error::NotEntitled("premium only".to_string()).is_transient());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Config("cursor field mismatch".to_string()).is_fatal());
        assert!(!Error::Network("timeout".to_string()).is_fatal());
        assert!(!Error::Payload("missing id".to_string()).is_fatal());
        assert!(Error::Payload("missing id".to_string()).is_item_level());
    }
}
