//! Error types for the client sync engine

use std::path::PathBuf;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Comprehensive error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Manifest tree rejected before planning
    #[error("Invalid manifest at '{path}': {message}")]
    InvalidManifest { path: String, message: String },

    /// Manifest could not be obtained from the server
    #[error("Manifest fetch failed: {0}")]
    ManifestFetch(String),

    /// Transport-level failure (connection, TLS, timeout, body read)
    #[error("Network error for '{url}': {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status
    #[error("HTTP {status} for '{url}'")]
    Http { url: String, status: u16 },

    /// Server answered with no content
    #[error("Empty response body for '{url}'")]
    EmptyBody { url: String },

    /// Destination write failure
    #[error("Failed to write '{path}': {message}")]
    Write { path: PathBuf, message: String },

    /// Invalid URL construction
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Progress reporting errors
    #[error("Progress reporting error: {0}")]
    Progress(String),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),

    /// Cancellation error
    #[error("Operation was cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new manifest validation error
    pub fn manifest_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new destination write error
    pub fn write_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network_error(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Whether this error is the cancellation signal rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
