//! Diff planner: walks the manifest and selects files that must be fetched

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SyncError};
use crate::inspector::{ContentHasher, LocalStateInspector, Xxh64Hasher};
use crate::manifest::{ManifestFolder, RelativePath};

/// One file selected for download
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Folder path below the manifest root
    pub path: RelativePath,
    pub file_name: String,
    /// Expected size from the manifest
    pub size: u64,
}

impl DownloadTask {
    pub fn new(path: RelativePath, file_name: impl Into<String>, size: u64) -> Self {
        Self {
            path,
            file_name: file_name.into(),
            size,
        }
    }

    /// `path/file_name` as shown in reports
    pub fn display_path(&self) -> String {
        self.path.join(&self.file_name).to_string()
    }

    pub fn remote_url(&self, base_url: &Url) -> Result<Url> {
        self.path.join(&self.file_name).to_url(base_url)
    }

    pub fn local_path(&self, local_root: &Path) -> PathBuf {
        self.path.join(&self.file_name).to_local(local_root)
    }
}

/// Summary of a download plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub files_checked: usize,
    pub files_to_download: usize,
    pub bytes_to_download: u64,
}

/// Materialized plan with its summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadPlan {
    pub tasks: Vec<DownloadTask>,
    pub summary: PlanSummary,
}

impl DownloadPlan {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Compares a manifest against a local tree
pub struct DiffPlanner<H = Xxh64Hasher> {
    inspector: LocalStateInspector<H>,
}

impl Default for DiffPlanner<Xxh64Hasher> {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffPlanner<Xxh64Hasher> {
    pub fn new() -> Self {
        Self {
            inspector: LocalStateInspector::new(),
        }
    }
}

impl<H: ContentHasher> DiffPlanner<H> {
    pub fn with_inspector(inspector: LocalStateInspector<H>) -> Self {
        Self { inspector }
    }

    /// Lazily yield tasks in manifest walk order. Each file is inspected
    /// only when the iterator reaches it.
    pub fn tasks<'a>(
        &'a self,
        manifest: &'a ManifestFolder,
        local_root: &'a Path,
    ) -> impl Iterator<Item = DownloadTask> + 'a {
        manifest.files().filter_map(move |(path, file)| {
            let state = self.inspector.inspect(local_root, &path, file);
            if state.needs_download() {
                tracing::debug!(path = %path.join(file.name()), ?state, "File queued for download");
                Some(DownloadTask::new(path, file.name(), file.size()))
            } else {
                None
            }
        })
    }

    /// Inspect the whole tree and return the full plan
    pub fn plan(&self, manifest: &ManifestFolder, local_root: &Path) -> DownloadPlan {
        self.collect(manifest, local_root, None).unwrap_or_default()
    }

    /// `None` when `cancel` fires before the walk finishes
    fn collect(
        &self,
        manifest: &ManifestFolder,
        local_root: &Path,
        cancel: Option<&CancellationToken>,
    ) -> Option<DownloadPlan> {
        let mut plan = DownloadPlan::default();

        for (path, file) in manifest.files() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return None;
            }

            plan.summary.files_checked += 1;
            if self.inspector.needs_download(local_root, &path, file) {
                plan.summary.files_to_download += 1;
                plan.summary.bytes_to_download += file.size();
                plan.tasks.push(DownloadTask::new(path, file.name(), file.size()));
            }
        }

        Some(plan)
    }
}

/// Plan on the blocking pool so hashing a large tree never stalls the
/// async caller. Cancellation is checked between files.
pub async fn plan_blocking(
    manifest: Arc<ManifestFolder>,
    local_root: PathBuf,
    cancel: CancellationToken,
) -> Result<DownloadPlan> {
    tokio::task::spawn_blocking(move || {
        DiffPlanner::new()
            .collect(&manifest, &local_root, Some(&cancel))
            .ok_or(SyncError::Cancelled)
    })
    .await
    .map_err(|e| SyncError::Generic(anyhow::anyhow!("planner task failed: {}", e)))?
}
