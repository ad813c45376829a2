//! HTTP transfer collaborator used by the download scheduler

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::ClientBuilder;
use tracing::debug;
use url::Url;

use crate::error::{Result, SyncError};

/// Response body as a stream of chunks
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Opens a streamed GET for a fully qualified URL.
///
/// Implementations must not retry on their own.
#[async_trait]
pub trait FileTransport: Send + Sync {
    async fn open(&self, url: &Url) -> Result<ByteStream>;
}

/// reqwest-backed transport; one instance is shared by all workers
#[derive(Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with reasonable defaults
    pub fn new() -> Result<Self> {
        HttpTransportBuilder::new().build()
    }

    /// Wrap an existing client
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.http_client
    }
}

#[async_trait]
impl FileTransport for HttpTransport {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        debug!(%url, "Requesting client file");

        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SyncError::network_error(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let url = url.to_string();
        Ok(response
            .bytes_stream()
            .map_err(move |e| SyncError::network_error(url.clone(), e))
            .boxed())
    }
}

/// Builder pattern for transport configuration
pub struct HttpTransportBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransportBuilder {
    pub fn new() -> Self {
        Self {
            timeout: None,
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: None,
        }
    }

    /// Whole-request timeout, body included
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let mut client_builder =
            ClientBuilder::new().redirect(reqwest::redirect::Policy::limited(10));

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        if let Some(connect_timeout) = self.connect_timeout {
            client_builder = client_builder.connect_timeout(connect_timeout);
        }

        if let Some(user_agent) = self.user_agent {
            client_builder = client_builder.user_agent(user_agent);
        }

        let http_client = client_builder
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(HttpTransport::with_client(http_client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_builder() {
        let transport = HttpTransportBuilder::new()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("launcher-test/1.0")
            .build();
        assert!(transport.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = HttpTransportBuilder::new()
            .connect_timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        // Port 9 (discard) on localhost is closed in test environments
        let url = Url::parse("http://127.0.0.1:9/client/file.bin").unwrap();

        match transport.open(&url).await {
            Err(SyncError::Network { url, .. }) => assert!(url.ends_with("/client/file.bin")),
            Err(other) => panic!("Expected Network error, got {:?}", other),
            Ok(_) => panic!("Expected Network error, got a body"),
        }
    }
}
