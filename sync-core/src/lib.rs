//! Launcher core
//!
//! Everything around the sync engine that a launcher front end needs:
//! server and client manifests over HTTP, the list of registered servers
//! and the configuration file.

pub mod api;
pub mod config;
pub mod registry;

pub use api::{ApiError, ClientManifest, LauncherClient, LauncherClientBuilder, LoginResponse, ServerManifest};
pub use config::{ConfigError, DownloadSettings, LauncherConfig, LoggingSettings};
pub use registry::{RegistryError, ServerInfo, ServerRegistry};

#[cfg(test)]
mod test_server;
