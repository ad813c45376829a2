//! Client Sync Engine
//!
//! Keeps a local game client tree identical to the tree a server publishes:
//! - Immutable manifest model with deterministic traversal
//! - Local state inspection by size, then xxHash64
//! - Diff planning of missing, stale and corrupt files
//! - Sequential or bounded-parallel streaming downloads
//! - Best-effort batches with aggregated, capped failure reports
//! - Cancellation and progress reporting

pub mod manifest;
pub mod inspector;
pub mod planner;
pub mod transport;
pub mod scheduler;
pub mod session;
pub mod progress;
pub mod error;

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

// Re-export main types and functions
pub use manifest::{ManifestEntries, ManifestFile, ManifestFolder, RelativePath};
pub use inspector::{ContentHasher, LocalState, LocalStateInspector, Xxh64Hasher};
pub use planner::{plan_blocking, DiffPlanner, DownloadPlan, DownloadTask, PlanSummary};
pub use transport::{ByteStream, FileTransport, HttpTransport, HttpTransportBuilder};
pub use scheduler::{
    DownloadConfig, DownloadScheduler, FailedEntry, SyncResult, DEFAULT_PARALLELISM, MAX_PARALLELISM,
    MIN_PARALLELISM,
};
pub use session::{FailureSummary, ManifestSource, SessionReport, SyncSession, FAILURE_REPORT_LIMIT};
pub use progress::{ProgressCallback, ProgressChannel, ProgressEvent, ProgressReporter};
pub use error::{Result, SyncError};

/// Whether one file must be downloaded again
pub fn needs_download(local_root: impl AsRef<Path>, path: &RelativePath, file: &ManifestFile) -> bool {
    LocalStateInspector::new().needs_download(local_root.as_ref(), path, file)
}

/// Compare a manifest with a local tree and list the files to fetch
pub fn plan(manifest: &ManifestFolder, local_root: impl AsRef<Path>) -> DownloadPlan {
    DiffPlanner::new().plan(manifest, local_root.as_ref())
}

/// Download every task of a plan
pub async fn execute(
    tasks: Vec<DownloadTask>,
    transport: Arc<dyn FileTransport>,
    config: DownloadConfig,
    cancel: &CancellationToken,
) -> Result<SyncResult> {
    DownloadScheduler::new(transport, config).execute(tasks, cancel).await
}

/// Fetch, plan, download and summarize in one call
pub async fn run_sync_session(
    source: Arc<dyn ManifestSource>,
    transport: Arc<dyn FileTransport>,
    config: DownloadConfig,
    cancel: &CancellationToken,
) -> Result<SessionReport> {
    let scheduler = DownloadScheduler::new(transport, config);
    SyncSession::new(source, scheduler).run(cancel).await
}

// Test modules
#[cfg(test)]
mod test_support;
#[cfg(test)]
mod planner_tests;
