//! Download scheduler: runs a plan sequentially or on a bounded worker pool
//!
//! Every planned task is attempted. A failed file is recorded and the batch
//! moves on; only cancellation stops it early. Partially written files are
//! left in place for the next planning pass to detect.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Result, SyncError};
use crate::planner::DownloadTask;
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::transport::{ByteStream, FileTransport};

/// Lower bound for parallel mode
pub const MIN_PARALLELISM: usize = 2;
/// Upper bound for parallel mode
pub const MAX_PARALLELISM: usize = 10;
/// Worker count used when nothing else is configured
pub const DEFAULT_PARALLELISM: usize = 4;

/// Where files come from and where they go
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// `false` runs one worker in plan order
    pub parallel: bool,
    /// Requested worker count in parallel mode, clamped to
    /// `[MIN_PARALLELISM, MAX_PARALLELISM]`
    pub max_parallelism: usize,
    /// Remote directory mirroring `local_root`
    pub base_url: Url,
    pub local_root: PathBuf,
}

impl DownloadConfig {
    pub fn new(base_url: Url, local_root: impl Into<PathBuf>) -> Self {
        Self {
            parallel: true,
            max_parallelism: DEFAULT_PARALLELISM,
            base_url,
            local_root: local_root.into(),
        }
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_parallelism(mut self, max_parallelism: usize) -> Self {
        self.parallel = true;
        self.max_parallelism = max_parallelism;
        self
    }

    /// Number of workers the scheduler will run
    pub fn effective_parallelism(&self) -> usize {
        if self.parallel {
            self.max_parallelism.clamp(MIN_PARALLELISM, MAX_PARALLELISM)
        } else {
            1
        }
    }
}

/// A file that could not be downloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub path: String,
    pub error: String,
}

/// Outcome of one download batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Every task completed without failure and the batch was not cancelled
    pub success: bool,
    pub cancelled: bool,
    /// Failed files in plan order, including transfers cut short by
    /// cancellation
    pub failed_entries: Vec<FailedEntry>,
    pub files_planned: usize,
    /// Tasks that finished, successfully or not
    pub files_completed: usize,
    pub bytes_downloaded: u64,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl SyncResult {
    /// Result of a batch with nothing to do
    pub fn up_to_date() -> Self {
        Self {
            success: true,
            cancelled: false,
            failed_entries: Vec::new(),
            files_planned: 0,
            files_completed: 0,
            bytes_downloaded: 0,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    pub fn failed_paths(&self) -> Vec<&str> {
        self.failed_entries.iter().map(|entry| entry.path.as_str()).collect()
    }
}

/// Executes download plans against one transport
pub struct DownloadScheduler {
    transport: Arc<dyn FileTransport>,
    config: Arc<DownloadConfig>,
    on_progress: Option<ProgressCallback>,
    reporter: Option<ProgressReporter>,
}

impl DownloadScheduler {
    pub fn new(transport: Arc<dyn FileTransport>, config: DownloadConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            on_progress: None,
            reporter: None,
        }
    }

    /// Called with `(completed, total)` after every finished task
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Structured per-file events
    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Run every task, collecting failures instead of stopping on them.
    ///
    /// Errors only when the local root is unusable; per-file problems are
    /// reported in the returned [`SyncResult`].
    pub async fn execute(&self, tasks: Vec<DownloadTask>, cancel: &CancellationToken) -> Result<SyncResult> {
        let started_at = Utc::now();
        let start_time = Instant::now();

        prepare_root(&self.config.local_root).await?;

        let files_planned = tasks.len();
        let total_bytes = tasks.iter().map(|task| task.size).sum::<u64>();
        let workers = self.config.effective_parallelism().min(files_planned.max(1));

        if let Some(reporter) = &self.reporter {
            reporter.sync_started(files_planned, total_bytes).await.ok();
        }

        info!(
            files = files_planned,
            bytes = total_bytes,
            workers,
            base_url = %self.config.base_url,
            "Starting download batch"
        );

        let state = Arc::new(BatchState::new(tasks));
        let mut pool = JoinSet::new();

        for worker_id in 0..workers {
            pool.spawn(self.worker(worker_id, &state, cancel, files_planned).run());
        }

        // Replace workers that die while tasks remain
        let mut next_worker_id = workers;
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Download worker terminated abnormally");
                if !cancel.is_cancelled() && state.has_pending() {
                    pool.spawn(self.worker(next_worker_id, &state, cancel, files_planned).run());
                    next_worker_id += 1;
                }
            }
        }

        let files_completed = state.completed.load(Ordering::SeqCst);
        let cancelled = cancel.is_cancelled() && files_completed < files_planned;
        let failed_entries = state.take_failures();

        let result = SyncResult {
            success: failed_entries.is_empty() && !cancelled && files_completed == files_planned,
            cancelled,
            failed_entries,
            files_planned,
            files_completed,
            bytes_downloaded: state.bytes.load(Ordering::SeqCst),
            started_at,
            duration: start_time.elapsed(),
        };

        if let Some(reporter) = &self.reporter {
            if cancelled {
                reporter.sync_cancelled().await.ok();
            } else {
                reporter.sync_completed().await.ok();
            }
        }

        info!(
            completed = result.files_completed,
            failed = result.failed_entries.len(),
            cancelled = result.cancelled,
            duration_ms = result.duration.as_millis() as u64,
            "Download batch finished"
        );

        Ok(result)
    }

    fn worker(&self, id: usize, state: &Arc<BatchState>, cancel: &CancellationToken, total: usize) -> Worker {
        Worker {
            id,
            transport: self.transport.clone(),
            config: self.config.clone(),
            state: state.clone(),
            cancel: cancel.clone(),
            on_progress: self.on_progress.clone(),
            reporter: self.reporter.clone(),
            total,
        }
    }
}

/// Queue and counters shared by all workers of a batch
struct BatchState {
    queue: Mutex<VecDeque<(usize, DownloadTask)>>,
    completed: AtomicUsize,
    bytes: AtomicU64,
    failures: Mutex<Vec<(usize, FailedEntry)>>,
}

impl BatchState {
    fn new(tasks: Vec<DownloadTask>) -> Self {
        Self {
            queue: Mutex::new(tasks.into_iter().enumerate().collect()),
            completed: AtomicUsize::new(0),
            bytes: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
        }
    }

    fn next_task(&self) -> Option<(usize, DownloadTask)> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    fn has_pending(&self) -> bool {
        !self.queue.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    fn record_failure(&self, index: usize, entry: FailedEntry) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((index, entry));
    }

    fn take_failures(&self) -> Vec<FailedEntry> {
        let mut failures =
            std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner));
        failures.sort_by_key(|(index, _)| *index);
        failures.into_iter().map(|(_, entry)| entry).collect()
    }
}

struct Worker {
    id: usize,
    transport: Arc<dyn FileTransport>,
    config: Arc<DownloadConfig>,
    state: Arc<BatchState>,
    cancel: CancellationToken,
    on_progress: Option<ProgressCallback>,
    reporter: Option<ProgressReporter>,
    total: usize,
}

impl Worker {
    async fn run(self) {
        while !self.cancel.is_cancelled() {
            let Some((index, task)) = self.state.next_task() else {
                break;
            };

            let path = task.display_path();
            let started = Instant::now();

            if let Some(reporter) = &self.reporter {
                reporter.file_started(path.as_str(), task.size).ok();
            }

            match self.download(&task).await {
                Ok(bytes) => {
                    self.state.bytes.fetch_add(bytes, Ordering::SeqCst);
                    debug!(worker = self.id, path = %path, bytes, "Downloaded client file");
                    if let Some(reporter) = &self.reporter {
                        reporter.file_completed(path.as_str(), bytes, started.elapsed()).await.ok();
                    }
                }
                Err(SyncError::Cancelled) => {
                    debug!(worker = self.id, path = %path, "Transfer aborted by cancellation");
                    self.state.record_failure(
                        index,
                        FailedEntry {
                            path,
                            error: SyncError::Cancelled.to_string(),
                        },
                    );
                    break;
                }
                Err(e) => {
                    warn!(worker = self.id, path = %path, error = %e, "Failed to download client file");
                    if let Some(reporter) = &self.reporter {
                        reporter.file_failed(path.as_str(), e.to_string()).await.ok();
                    }
                    self.state.record_failure(
                        index,
                        FailedEntry {
                            path,
                            error: e.to_string(),
                        },
                    );
                }
            }

            let completed = self.state.completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(callback) = &self.on_progress {
                callback(completed, self.total);
            }
        }
    }

    /// Stream one file to disk and return the number of bytes written
    async fn download(&self, task: &DownloadTask) -> Result<u64> {
        let url = task.remote_url(&self.config.base_url)?;
        let destination = task.local_path(&self.config.local_root);

        if let Some(parent) = destination.parent() {
            ensure_directory(parent).await?;
        }

        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            opened = self.transport.open(&url) => opened?,
        };

        // The destination is only touched once there is data to write
        let first = loop {
            match self.next_chunk(&mut stream).await? {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => break chunk,
                None => return Err(SyncError::EmptyBody { url: url.to_string() }),
            }
        };

        let file = fs::File::create(&destination)
            .await
            .map_err(|e| SyncError::write_error(&destination, e.to_string()))?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;

        let mut chunk = Some(first);
        while let Some(bytes) = chunk {
            writer
                .write_all(&bytes)
                .await
                .map_err(|e| SyncError::write_error(&destination, e.to_string()))?;
            written += bytes.len() as u64;
            chunk = self.next_chunk(&mut stream).await?;
        }

        writer
            .flush()
            .await
            .map_err(|e| SyncError::write_error(&destination, e.to_string()))?;

        Ok(written)
    }

    async fn next_chunk(&self, stream: &mut ByteStream) -> Result<Option<Bytes>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            next = stream.next() => next.transpose(),
        }
    }
}

/// Create the local root or fail the whole batch
async fn prepare_root(root: &Path) -> Result<()> {
    match fs::metadata(root).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(SyncError::Config(format!(
            "local root '{}' is not a directory",
            root.display()
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(root).await.map_err(|e| {
            SyncError::Config(format!("cannot create local root '{}': {}", root.display(), e))
        }),
        Err(e) => Err(SyncError::Config(format!(
            "cannot access local root '{}': {}",
            root.display(),
            e
        ))),
    }
}

/// Idempotent directory creation; concurrent callers racing on the same
/// path all succeed
async fn ensure_directory(path: &Path) -> Result<()> {
    match fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(SyncError::path_error(
            path,
            format!("Failed to create directory: {}", e),
        )),
    }
}
