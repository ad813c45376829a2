//! Test doubles shared by the engine's test modules

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use url::Url;

use crate::error::{Result, SyncError};
use crate::inspector::Xxh64Hasher;
use crate::manifest::{ManifestFile, ManifestFolder, RelativePath};
use crate::planner::DownloadTask;
use crate::session::ManifestSource;
use crate::transport::{ByteStream, FileTransport};

pub const BASE_URL: &str = "http://launcher.test/client";

pub fn base_url() -> Url {
    Url::parse(BASE_URL).unwrap()
}

/// Body served for a path unless scripted otherwise
pub fn body_for(path: &str) -> Vec<u8> {
    format!("content of {}", path).into_bytes()
}

/// Task for `dir/sub/name.ext`
pub fn task(path: &str) -> DownloadTask {
    let full = RelativePath::parse(path);
    let (name, folders) = full.segments().split_last().unwrap();
    DownloadTask::new(
        RelativePath::from_segments(folders.iter().cloned()),
        name.clone(),
        body_for(path).len() as u64,
    )
}

/// Manifest whose files carry the default bodies
pub fn manifest_for(paths: &[&str]) -> ManifestFolder {
    let entries: Vec<(String, Vec<u8>)> = paths.iter().map(|p| (p.to_string(), body_for(p))).collect();
    manifest_with_contents(&entries)
}

/// Build a tree from `path -> content`; folders are ordered by name
pub fn manifest_with_contents(entries: &[(String, Vec<u8>)]) -> ManifestFolder {
    #[derive(Default)]
    struct Node {
        folders: BTreeMap<String, Node>,
        files: Vec<ManifestFile>,
    }

    fn into_folder(name: String, node: Node) -> ManifestFolder {
        let folders = node
            .folders
            .into_iter()
            .map(|(name, child)| into_folder(name, child))
            .collect();
        ManifestFolder::new(name, folders, node.files)
    }

    let mut root = Node::default();
    for (path, content) in entries {
        let full = RelativePath::parse(path);
        let (name, folders) = full.segments().split_last().unwrap();
        let mut node = &mut root;
        for folder in folders {
            node = node.folders.entry(folder.clone()).or_default();
        }
        node.files.push(ManifestFile::new(
            name.clone(),
            content.len() as u64,
            Xxh64Hasher::hash_bytes(content),
        ));
    }

    into_folder("Client".to_string(), root)
}

/// Write the default body for each path under `root`
pub fn materialize(root: &Path, paths: &[&str]) {
    for path in paths {
        let local = RelativePath::parse(path).to_local(root);
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(local, body_for(path)).unwrap();
    }
}

#[derive(Clone)]
pub enum Script {
    Chunks(Vec<Bytes>),
    Status(u16),
    Empty,
    Hang,
}

/// Scripted [`FileTransport`] that records what was opened and how many
/// requests were in flight at once
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    gate: Option<Arc<Semaphore>>,
    opened: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request waits for a permit from `gate`
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn script(self, path: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(path.to_string(), script);
        self
    }

    pub fn fail(self, path: &str, status: u16) -> Self {
        self.script(path, Script::Status(status))
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileTransport for ScriptedTransport {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        let key = url
            .path()
            .trim_start_matches(base_url().path())
            .trim_start_matches('/')
            .to_string();
        self.opened.lock().unwrap().push(key.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let script = self.scripts.lock().unwrap().get(&key).cloned();
        match script {
            None => Ok(stream::iter(vec![Ok(Bytes::from(body_for(&key)))]).boxed()),
            Some(Script::Chunks(chunks)) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Some(Script::Status(status)) => Err(SyncError::Http {
                url: url.to_string(),
                status,
            }),
            Some(Script::Empty) => Ok(stream::empty().boxed()),
            Some(Script::Hang) => futures::future::pending().await,
        }
    }
}

/// Manifest source returning a fixed tree or a fixed error message
pub struct StaticManifestSource {
    manifest: Option<ManifestFolder>,
    calls: AtomicUsize,
}

impl StaticManifestSource {
    pub fn new(manifest: ManifestFolder) -> Self {
        Self {
            manifest: Some(manifest),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            manifest: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestSource for StaticManifestSource {
    async fn fetch_manifest(&self) -> Result<ManifestFolder> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.manifest
            .clone()
            .ok_or_else(|| SyncError::ManifestFetch("Failed to get client manifest. Http Error: Not Found".to_string()))
    }
}
