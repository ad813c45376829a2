//! Launcher configuration file

use std::path::{Path, PathBuf};
use std::time::Duration;

use launcher_sync::{DownloadConfig, HttpTransport, HttpTransportBuilder, MAX_PARALLELISM, MIN_PARALLELISM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{default_user_agent, validate_server_url, ApiError};
use crate::registry::ServerInfo;

/// Directory below the platform data directory holding everything the
/// launcher writes
pub const DATA_DIRECTORY: &str = "OSFRLauncher";
pub const CONFIG_FILE: &str = "launcher.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine the local data directory")]
    NoDataDir,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Overrides `<platform data dir>/OSFRLauncher`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub servers: Vec<ServerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON log file, in addition to the console
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            threads: default_threads(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl DownloadSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Client for manifest requests; `timeout_secs` bounds each request
    pub fn manifest_http_client(&self) -> std::result::Result<reqwest::Client, ApiError> {
        reqwest::Client::builder()
            .timeout(self.timeout())
            .connect_timeout(self.connect_timeout())
            .user_agent(self.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(ApiError::ClientBuild)
    }

    /// Transport for client files. Only connecting is bounded, since a
    /// large file may legitimately stream for longer than `timeout_secs`.
    pub fn transport(&self) -> launcher_sync::Result<HttpTransport> {
        HttpTransportBuilder::new()
            .connect_timeout(self.connect_timeout())
            .user_agent(self.user_agent.clone())
            .build()
    }

    /// Scheduler settings for one server's client tree
    pub fn download_config(&self, server: &ServerInfo) -> std::result::Result<DownloadConfig, ApiError> {
        let mut config = DownloadConfig::new(server.client_files_url()?, server.client_root());
        config.parallel = self.parallel;
        config.max_parallelism = self.threads;
        Ok(config)
    }
}

impl LauncherConfig {
    /// `<platform data dir>/OSFRLauncher/launcher.toml`
    pub fn default_path() -> Result<PathBuf> {
        Ok(platform_data_dir()?.join(CONFIG_FILE))
    }

    /// Where server directories are allocated
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => platform_data_dir(),
        }
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults when the file does not exist yet
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match tokio::fs::metadata(path.as_ref()).await {
            Ok(_) => Self::load(path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.as_ref().to_path_buf(),
                source,
            }),
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_toml()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }

        tokio::fs::write(path, content).await.map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.download.threads == 0 {
            return Err(ConfigError::Invalid("download.threads must be at least 1".to_string()));
        }
        if self.download.timeout_secs == 0 || self.download.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("download timeouts must be greater than zero".to_string()));
        }
        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::Invalid(format!("unknown log level '{}'", self.logging.level)));
        }

        for (i, server) in self.servers.iter().enumerate() {
            if server.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("server #{} has no name", i + 1)));
            }
            validate_server_url(&server.url)
                .map_err(|e| ConfigError::Invalid(format!("server '{}': {}", server.name, e)))?;
            if self.servers[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&server.name))
            {
                return Err(ConfigError::Invalid(format!("duplicate server name '{}'", server.name)));
            }
        }

        Ok(())
    }

    /// Parallel degree the scheduler will actually use
    pub fn effective_threads(&self) -> usize {
        if self.download.parallel {
            self.download.threads.clamp(MIN_PARALLELISM, MAX_PARALLELISM)
        } else {
            1
        }
    }
}

fn platform_data_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join(DATA_DIRECTORY))
        .ok_or(ConfigError::NoDataDir)
}

// Default value functions
fn default_parallel() -> bool { true }
fn default_threads() -> usize { 4 }
fn default_timeout_secs() -> u64 { 300 }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }
