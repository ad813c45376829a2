use std::time::Duration;

use async_trait::async_trait;
use launcher_sync::{ManifestFolder, ManifestSource, SyncError};
use reqwest::header::CONTENT_TYPE;
use reqwest::{ClientBuilder, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use super::error::{ApiError, Result};
use super::types::{parse_versioned, ClientManifest, LoginRequest, LoginResponse, ServerManifest};

/// Directory below the server URL that mirrors the client tree
pub const CLIENT_DIRECTORY: &str = "client";

const ACCEPTED_CONTENT_TYPES: &[&str] = &["text/xml", "application/xml"];

/// Default user agent for manifest and file requests
pub fn default_user_agent() -> String {
    format!("OSFRLauncher/{}", env!("CARGO_PKG_VERSION"))
}

/// Parse and check a user-supplied server URL
pub fn validate_server_url(input: &str) -> Result<Url> {
    let input = input.trim();
    let url = Url::parse(input).map_err(|e| ApiError::InvalidUrl(format!("'{}' is not an absolute URL: {}", input, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ApiError::InvalidUrl(format!(
            "'{}' uses unsupported scheme '{}', expected http or https",
            input, scheme
        ))),
    }
}

/// Append path segments to `base`, keeping whatever path it already has
pub fn join_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(format!("'{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// HTTP client for one launcher server
#[derive(Debug, Clone)]
pub struct LauncherClient {
    http_client: reqwest::Client,
    server_url: Url,
}

impl LauncherClient {
    /// Create a client with default timeouts
    pub fn new(server_url: &str) -> Result<Self> {
        LauncherClientBuilder::new(server_url).build()
    }

    /// Share an existing connection pool
    pub fn with_client(server_url: Url, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            server_url,
        }
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Base URL the client files are served from
    pub fn client_files_url(&self) -> Result<Url> {
        join_url(&self.server_url, &[CLIENT_DIRECTORY])
    }

    pub async fn server_manifest(&self) -> Result<ServerManifest> {
        let manifest: ServerManifest = self
            .fetch_xml(ServerManifest::FILE_NAME, ServerManifest::VERSION)
            .await?;
        debug!(name = %manifest.name, "Fetched server manifest");
        Ok(manifest)
    }

    pub async fn client_manifest(&self) -> Result<ClientManifest> {
        let manifest: ClientManifest = self
            .fetch_xml(ClientManifest::FILE_NAME, ClientManifest::VERSION)
            .await?;
        debug!(root = %manifest.root.name, "Fetched client manifest");
        Ok(manifest)
    }

    /// Post credentials to `login_api_url`.
    ///
    /// A 401 is [`ApiError::Unauthorized`]; a success without a session id
    /// is [`ApiError::InvalidLoginResponse`].
    pub async fn login(&self, login_api_url: &str, username: &str, password: &str) -> Result<LoginResponse> {
        let url = Url::parse(login_api_url.trim())
            .map_err(|e| ApiError::InvalidUrl(format!("'{}' is not a valid login API URL: {}", login_api_url, e)))?;
        if url.scheme() != "https" {
            warn!(url = %url, "Login API is not using https, credentials are sent unencrypted");
        }

        info!(url = %url, username, "Logging in");

        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http_client
            .post(url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidLoginResponse(e.to_string()))?;
        if login.session_id.trim().is_empty() {
            return Err(ApiError::InvalidLoginResponse("missing session id".to_string()));
        }

        debug!(username, "Login accepted");
        Ok(login)
    }

    async fn fetch_xml<T>(&self, file_name: &str, version: u32) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = join_url(&self.server_url, &[file_name])?;
        info!(url = %url, "Fetching manifest");

        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_xml_content_type(&content_type) {
            return Err(ApiError::ContentType(content_type));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))?;

        parse_versioned(&body, version)
    }
}

fn is_xml_content_type(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    ACCEPTED_CONTENT_TYPES
        .iter()
        .any(|accepted| media_type.eq_ignore_ascii_case(accepted))
}

#[async_trait]
impl ManifestSource for LauncherClient {
    async fn fetch_manifest(&self) -> launcher_sync::Result<ManifestFolder> {
        let manifest = self.client_manifest().await.map_err(SyncError::from)?;
        Ok(manifest.into_manifest()?)
    }
}

/// Builder pattern for client configuration
pub struct LauncherClientBuilder {
    server_url: String,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl LauncherClientBuilder {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            timeout: None,
            connect_timeout: None,
            user_agent: None,
        }
    }

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

    pub fn build(self) -> Result<LauncherClient> {
        let server_url = validate_server_url(&self.server_url)?;

        let mut client_builder = ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(self.connect_timeout.unwrap_or(Duration::from_secs(10)))
            .user_agent(self.user_agent.unwrap_or_else(default_user_agent));

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let http_client = client_builder
            .build()
            .map_err(ApiError::ClientBuild)?;

        Ok(LauncherClient::with_client(server_url, http_client))
    }
}
