use launcher_sync::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Http Error: {status} {reason} ({url})")]
    Http {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("invalid format, Content Type: {0}")]
    ContentType(String),

    #[error("invalid version, expected {expected} but found {}", found.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string()))]
    Version { expected: u32, found: Option<u32> },

    #[error("invalid data, Xml Error: {0}")]
    Xml(String),

    #[error("invalid manifest at '{path}': {message}")]
    InvalidManifest { path: String, message: String },

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid username or password")]
    Unauthorized,

    #[error("Invalid login api response: {0}")]
    InvalidLoginResponse(String),
}

impl ApiError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Worth trying again later without changing anything
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network { .. } => true,
            ApiError::Http { status, .. } if *status >= 500 => true,
            _ => false,
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(e: url::ParseError) -> Self {
        ApiError::InvalidUrl(e.to_string())
    }
}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::InvalidManifest { path, message } => SyncError::InvalidManifest { path, message },
            other => SyncError::ManifestFetch(format!("Failed to get client manifest, {}", other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
