//! Launcher server API
//!
//! A launcher server publishes two XML documents at its base URL
//! (`servermanifest.xml` and `clientmanifest.xml`) and serves the client
//! tree below `client/`. Logins go to the JSON API the server manifest
//! names.

pub mod client;
pub mod error;
pub mod types;

// Re-export main types for convenience
pub use client::{
    default_user_agent, join_url, validate_server_url, LauncherClient, LauncherClientBuilder, CLIENT_DIRECTORY,
};
pub use error::{ApiError, Result};
pub use types::{ClientFile, ClientFolder, ClientManifest, LoginRequest, LoginResponse, ServerManifest};
