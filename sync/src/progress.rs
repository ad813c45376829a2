//! Progress reporting for download batches

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Plain `(completed, total)` callback, invoked from whichever worker
/// finished a file. Marshaling to a UI thread is the callee's job.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Structured events of one download batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    SyncStarted {
        session_id: Uuid,
        total_files: usize,
        total_bytes: u64,
    },
    /// A worker picked up a file
    FileStarted { path: String, file_size: u64 },
    /// File written to disk
    FileCompleted {
        path: String,
        bytes: u64,
        duration: Duration,
    },
    FileFailed { path: String, error: String },
    /// Sent after every finished file, failed or not
    ProgressUpdate {
        files_completed: usize,
        files_total: usize,
        bytes_downloaded: u64,
        elapsed_time: Duration,
        /// Bytes per second since the batch started
        transfer_rate: f64,
    },
    /// Batch finished, with or without failures
    SyncCompleted {
        session_id: Uuid,
        files_completed: usize,
        files_failed: usize,
        bytes_downloaded: u64,
        duration: Duration,
    },
    SyncCancelled {
        session_id: Uuid,
        files_completed: usize,
        duration: Duration,
    },
}

/// Receiving end of a batch's events. The channel ends once every
/// [`ProgressReporter`] clone is dropped.
pub struct ProgressChannel {
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressChannel {
    pub fn new() -> (ProgressReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ProgressReporter::new(sender), Self { receiver })
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }
}

/// Sending end, cloned into each download worker
#[derive(Clone)]
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
    session_id: Uuid,
    start_time: Instant,
    tally: Arc<Mutex<Tally>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    files_total: usize,
    files_completed: usize,
    files_failed: usize,
    bytes_downloaded: u64,
}

impl ProgressReporter {
    fn new(sender: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            sender,
            session_id: Uuid::new_v4(),
            start_time: Instant::now(),
            tally: Arc::new(Mutex::new(Tally::default())),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn sync_started(&self, total_files: usize, total_bytes: u64) -> Result<()> {
        self.update(|tally| tally.files_total = total_files);

        self.send(ProgressEvent::SyncStarted {
            session_id: self.session_id,
            total_files,
            total_bytes,
        })
    }

    pub fn file_started(&self, path: impl Into<String>, file_size: u64) -> Result<()> {
        self.send(ProgressEvent::FileStarted {
            path: path.into(),
            file_size,
        })
    }

    pub async fn file_completed(&self, path: impl Into<String>, bytes: u64, duration: Duration) -> Result<()> {
        let tally = self.update(|tally| {
            tally.files_completed += 1;
            tally.bytes_downloaded += bytes;
        });

        self.send(ProgressEvent::FileCompleted {
            path: path.into(),
            bytes,
            duration,
        })?;
        self.send_update(tally)
    }

    /// A failed file still counts towards completion
    pub async fn file_failed(&self, path: impl Into<String>, error: impl Into<String>) -> Result<()> {
        let tally = self.update(|tally| {
            tally.files_completed += 1;
            tally.files_failed += 1;
        });

        self.send(ProgressEvent::FileFailed {
            path: path.into(),
            error: error.into(),
        })?;
        self.send_update(tally)
    }

    pub async fn sync_completed(&self) -> Result<()> {
        let tally = self.update(|_| {});

        self.send(ProgressEvent::SyncCompleted {
            session_id: self.session_id,
            files_completed: tally.files_completed,
            files_failed: tally.files_failed,
            bytes_downloaded: tally.bytes_downloaded,
            duration: self.start_time.elapsed(),
        })
    }

    pub async fn sync_cancelled(&self) -> Result<()> {
        let tally = self.update(|_| {});

        self.send(ProgressEvent::SyncCancelled {
            session_id: self.session_id,
            files_completed: tally.files_completed,
            duration: self.start_time.elapsed(),
        })
    }

    /// Apply `change` and return the counters as they stand afterwards
    fn update(&self, change: impl FnOnce(&mut Tally)) -> Tally {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut tally);
        *tally
    }

    fn send_update(&self, tally: Tally) -> Result<()> {
        let elapsed_time = self.start_time.elapsed();
        let seconds = elapsed_time.as_secs_f64();
        let transfer_rate = if seconds > 0.0 {
            tally.bytes_downloaded as f64 / seconds
        } else {
            0.0
        };

        self.send(ProgressEvent::ProgressUpdate {
            files_completed: tally.files_completed,
            files_total: tally.files_total,
            bytes_downloaded: tally.bytes_downloaded,
            elapsed_time,
            transfer_rate,
        })
    }

    fn send(&self, event: ProgressEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| SyncError::Progress("Progress channel disconnected".to_string()))
    }
}

/// Human-readable byte count, binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
