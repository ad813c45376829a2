//! XML wire types published by launcher servers

use launcher_sync::{ManifestFile, ManifestFolder};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, Result};

/// Server description at `<server>/servermanifest.xml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "ServerManifest")]
pub struct ServerManifest {
    #[serde(rename = "@version")]
    pub version: u32,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "LoginServer", default)]
    pub login_server: String,
    #[serde(rename = "LoginApiUrl", default)]
    pub login_api_url: String,
}

impl ServerManifest {
    pub const FILE_NAME: &'static str = "servermanifest.xml";
    pub const VERSION: u32 = 1;
}

/// Client file tree at `<server>/clientmanifest.xml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "ClientManifest")]
pub struct ClientManifest {
    #[serde(rename = "@version")]
    pub version: u32,
    #[serde(rename = "Folder")]
    pub root: ClientFolder,
}

impl ClientManifest {
    pub const FILE_NAME: &'static str = "clientmanifest.xml";
    pub const VERSION: u32 = 1;

    /// Convert into the engine's model and reject unsafe trees
    pub fn into_manifest(self) -> Result<ManifestFolder> {
        let manifest = self.root.into_folder();
        manifest.validate().map_err(|e| match e {
            launcher_sync::SyncError::InvalidManifest { path, message } => {
                ApiError::InvalidManifest { path, message }
            }
            other => ApiError::InvalidManifest {
                path: String::new(),
                message: other.to_string(),
            },
        })?;
        Ok(manifest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFolder {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "File", default)]
    pub files: Vec<ClientFile>,
    #[serde(rename = "Folder", default)]
    pub folders: Vec<ClientFolder>,
}

impl ClientFolder {
    fn into_folder(self) -> ManifestFolder {
        ManifestFolder::new(
            self.name,
            self.folders.into_iter().map(ClientFolder::into_folder).collect(),
            self.files
                .into_iter()
                .map(|file| ManifestFile::new(file.name, file.size, file.hash))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFile {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@size")]
    pub size: u64,
    /// xxHash64 as an unsigned decimal
    #[serde(rename = "@hash")]
    pub hash: u64,
}

/// `version` attribute of the document's root element, if it has one
pub fn root_version(xml: &str) -> Result<Option<u32>> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event().map_err(|e| ApiError::Xml(e.to_string()))? {
            Event::Start(element) | Event::Empty(element) => {
                let version = element
                    .try_get_attribute("version")
                    .map_err(|e| ApiError::Xml(e.to_string()))?
                    .and_then(|attr| {
                        std::str::from_utf8(&attr.value)
                            .ok()
                            .and_then(|value| value.trim().parse().ok())
                    });
                return Ok(version);
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Check the root version, then deserialize the whole document
/// Credentials posted as JSON to a server's login API
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Answer of a login API; field names are matched in either case style
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default, alias = "Success")]
    pub success: bool,
    #[serde(default, alias = "SessionId")]
    pub session_id: String,
    #[serde(default, alias = "LaunchArguments")]
    pub launch_arguments: Option<String>,
}

impl LoginResponse {
    /// Command line the game client is started with
    pub fn client_arguments(&self, login_server: &str) -> Vec<String> {
        let mut arguments = vec![
            format!("Server={}", login_server),
            format!("SessionId={}", self.session_id),
        ];
        if let Some(extra) = self.launch_arguments.as_deref().filter(|a| !a.trim().is_empty()) {
            arguments.push(extra.to_string());
        }
        arguments
    }
}

pub fn parse_versioned<T>(xml: &str, expected: u32) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let found = root_version(xml)?;
    if found != Some(expected) {
        return Err(ApiError::Version { expected, found });
    }

    quick_xml::de::from_str(xml).map_err(|e| ApiError::Xml(e.to_string()))
}
