//! Registered launcher servers and their local save directories

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::api::{join_url, validate_server_url, ApiError, LauncherClient, ServerManifest, CLIENT_DIRECTORY};

/// Directory below the data directory holding one folder per server
pub const SERVERS_DIRECTORY: &str = "Servers";
/// Directory below a server's save path mirroring the server's client tree
pub const CLIENT_ROOT_DIRECTORY: &str = "Client";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Server name is missing in manifest.")]
    MissingName,

    #[error("A server named '{0}' already exists")]
    Duplicate(String),

    #[error("No server named '{0}'")]
    NotFound(String),

    #[error("Failed to create a save path for server: {0}")]
    SavePath(#[source] io::Error),

    #[error("Failed to delete server directory {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// A server the launcher knows about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub login_server: String,
    #[serde(default)]
    pub login_api_url: String,
    pub save_path: PathBuf,
}

impl ServerInfo {
    /// Local root of the synchronized client tree
    pub fn client_root(&self) -> PathBuf {
        self.save_path.join(CLIENT_ROOT_DIRECTORY)
    }

    /// Remote directory the client files are served from
    pub fn client_files_url(&self) -> std::result::Result<Url, ApiError> {
        join_url(&validate_server_url(&self.url)?, &[CLIENT_DIRECTORY])
    }

    fn apply(&mut self, manifest: &ServerManifest) {
        self.description = manifest.description.clone();
        self.login_server = manifest.login_server.clone();
        self.login_api_url = manifest.login_api_url.clone();
    }
}

/// In-memory list of servers; callers persist it through the config file
pub struct ServerRegistry {
    data_dir: PathBuf,
    servers: Vec<ServerInfo>,
    http_client: reqwest::Client,
}

impl ServerRegistry {
    pub fn new(data_dir: impl Into<PathBuf>, servers: Vec<ServerInfo>) -> Self {
        Self::with_http_client(data_dir, servers, reqwest::Client::new())
    }

    pub fn with_http_client(data_dir: impl Into<PathBuf>, servers: Vec<ServerInfo>, http_client: reqwest::Client) -> Self {
        Self {
            data_dir: data_dir.into(),
            servers,
            http_client,
        }
    }

    pub fn servers(&self) -> &[ServerInfo] {
        &self.servers
    }

    pub fn into_servers(self) -> Vec<ServerInfo> {
        self.servers
    }

    /// Case-insensitive lookup
    pub fn find(&self, name: &str) -> Option<&ServerInfo> {
        self.position(name).map(|index| &self.servers[index])
    }

    /// Client for talking to a registered server
    pub fn client(&self, server: &ServerInfo) -> std::result::Result<LauncherClient, ApiError> {
        Ok(LauncherClient::with_client(
            validate_server_url(&server.url)?,
            self.http_client.clone(),
        ))
    }

    /// Register the server at `url` using the name from its manifest
    pub async fn add(&mut self, url: &str) -> Result<ServerInfo> {
        let server_url = validate_server_url(url)?;
        let client = LauncherClient::with_client(server_url.clone(), self.http_client.clone());
        let manifest = client.server_manifest().await?;

        let name = manifest.name.trim();
        if name.is_empty() {
            return Err(RegistryError::MissingName);
        }
        if self.position(name).is_some() {
            return Err(RegistryError::Duplicate(name.to_string()));
        }

        let save_path = allocate_save_path(&self.data_dir.join(SERVERS_DIRECTORY), name)
            .await
            .map_err(RegistryError::SavePath)?;

        let mut server = ServerInfo {
            url: url.trim().to_string(),
            name: name.to_string(),
            description: String::new(),
            login_server: String::new(),
            login_api_url: String::new(),
            save_path,
        };
        server.apply(&manifest);

        info!(name = %server.name, url = %server.url, save_path = %server.save_path.display(), "Added server");
        self.servers.push(server.clone());
        Ok(server)
    }

    /// Re-read the server manifest and update the stored details
    pub async fn refresh(&mut self, name: &str) -> Result<&ServerInfo> {
        let index = self
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let client = self.client(&self.servers[index])?;
        let manifest = client.server_manifest().await?;

        let server = &mut self.servers[index];
        if !manifest.name.trim().is_empty() && manifest.name.trim() != server.name {
            warn!(stored = %server.name, advertised = %manifest.name, "Server now advertises a different name");
        }
        server.apply(&manifest);
        info!(name = %server.name, "Refreshed server details");

        Ok(&self.servers[index])
    }

    /// Forget a server. With `delete_files` its save directory goes first,
    /// and the server stays registered if that fails.
    pub async fn remove(&mut self, name: &str, delete_files: bool) -> Result<ServerInfo> {
        let index = self
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if delete_files {
            let path = self.servers[index].save_path.clone();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => info!(path = %path.display(), "Deleted server directory"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(RegistryError::Delete { path, source }),
            }
        }

        let server = self.servers.remove(index);
        info!(name = %server.name, "Removed server");
        Ok(server)
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.servers
            .iter()
            .position(|server| server.name.eq_ignore_ascii_case(name))
    }
}

/// Turn a display name into a single safe directory name
pub fn directory_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "Server".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Create `<base>/<name>`, or `<base>/<name>_N` for the first free `N`
async fn allocate_save_path(base: &Path, name: &str) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(base).await?;

    let stem = directory_name(name);
    let mut counter = 0usize;
    loop {
        let candidate = if counter == 0 {
            base.join(&stem)
        } else {
            base.join(format!("{}_{}", stem, counter))
        };

        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{server_xml, spawn, xml};
    use rstest::rstest;
    use tempfile::TempDir;

    async fn server_at(name: &str) -> String {
        let addr = spawn(vec![("/servermanifest.xml", xml(&server_xml(name)))]).await;
        format!("http://{}", addr)
    }

    #[rstest]
    #[case("Test Server", "Test Server")]
    #[case("a/b\\c:d", "a_b_c_d")]
    #[case("  Spaced.  ", "Spaced")]
    #[case("...", "Server")]
    #[case("", "Server")]
    fn test_directory_name(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(directory_name(name), expected);
    }

    #[tokio::test]
    async fn test_add_server() {
        let temp_dir = TempDir::new().unwrap();
        let url = server_at("Test Server").await;
        let mut registry = ServerRegistry::new(temp_dir.path(), Vec::new());

        let server = registry.add(&url).await.unwrap();

        assert_eq!(server.name, "Test Server");
        assert_eq!(server.description, "Test Server description");
        assert_eq!(server.login_server, "127.0.0.1:20260");
        assert_eq!(server.save_path, temp_dir.path().join("Servers").join("Test Server"));
        assert!(server.save_path.is_dir());
        assert_eq!(server.client_root(), server.save_path.join("Client"));
        assert_eq!(registry.servers().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected_case_insensitively() {
        let temp_dir = TempDir::new().unwrap();
        let first = server_at("Test Server").await;
        let second = server_at("TEST SERVER").await;
        let mut registry = ServerRegistry::new(temp_dir.path(), Vec::new());

        registry.add(&first).await.unwrap();
        let result = registry.add(&second).await;

        assert!(matches!(result, Err(RegistryError::Duplicate(_))));
        assert_eq!(registry.servers().len(), 1);
    }

    #[tokio::test]
    async fn test_save_path_gets_unique_suffix() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("Servers").join("Test")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("Servers").join("Test_1")).unwrap();
        let url = server_at("Test").await;
        let mut registry = ServerRegistry::new(temp_dir.path(), Vec::new());

        let server = registry.add(&url).await.unwrap();

        assert_eq!(server.save_path, temp_dir.path().join("Servers").join("Test_2"));
    }

    #[tokio::test]
    async fn test_nameless_server_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let url = server_at("   ").await;
        let mut registry = ServerRegistry::new(temp_dir.path(), Vec::new());

        let result = registry.add(&url).await;

        assert!(matches!(result, Err(RegistryError::MissingName)));
        assert!(!temp_dir.path().join("Servers").exists());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = ServerRegistry::new(temp_dir.path(), Vec::new());

        let result = registry.add("ftp://example.com").await;

        assert!(matches!(result, Err(RegistryError::Api(ApiError::InvalidUrl(_)))));
    }

    #[tokio::test]
    async fn test_refresh_updates_details() {
        let temp_dir = TempDir::new().unwrap();
        let url = server_at("Test").await;
        let mut registry = ServerRegistry::new(
            temp_dir.path(),
            vec![ServerInfo {
                url,
                name: "Test".to_string(),
                description: "stale".to_string(),
                login_server: String::new(),
                login_api_url: String::new(),
                save_path: temp_dir.path().join("Servers").join("Test"),
            }],
        );

        let server = registry.refresh("test").await.unwrap();

        assert_eq!(server.description, "Test description");
        assert_eq!(server.login_api_url, "http://127.0.0.1/api");
    }

    #[tokio::test]
    async fn test_remove_with_files() {
        let temp_dir = TempDir::new().unwrap();
        let url = server_at("Test").await;
        let mut registry = ServerRegistry::new(temp_dir.path(), Vec::new());
        let server = registry.add(&url).await.unwrap();
        std::fs::create_dir_all(server.client_root()).unwrap();
        std::fs::write(server.client_root().join("FreeRealms.exe"), b"MZ").unwrap();

        let removed = registry.remove("TEST", true).await.unwrap();

        assert_eq!(removed.name, "Test");
        assert!(!server.save_path.exists());
        assert!(registry.servers().is_empty());
    }

    #[tokio::test]
    async fn test_remove_keeps_files_when_asked() {
        let temp_dir = TempDir::new().unwrap();
        let url = server_at("Test").await;
        let mut registry = ServerRegistry::new(temp_dir.path(), Vec::new());
        let server = registry.add(&url).await.unwrap();

        registry.remove("Test", false).await.unwrap();

        assert!(server.save_path.is_dir());
        assert!(matches!(
            registry.remove("Test", false).await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
