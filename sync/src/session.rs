//! One "verify and play" pass: fetch manifest, plan, download, summarize

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::manifest::ManifestFolder;
use crate::planner::{plan_blocking, PlanSummary};
use crate::scheduler::{DownloadScheduler, FailedEntry, SyncResult};

/// Number of failed paths listed before collapsing the rest
pub const FAILURE_REPORT_LIMIT: usize = 10;

/// Supplies the validated client manifest for a server
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch_manifest(&self) -> Result<ManifestFolder>;
}

/// Bounded list of failed paths for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub total: usize,
    pub shown: Vec<String>,
    /// Failures not listed in `shown`
    pub remaining: usize,
}

impl FailureSummary {
    /// `None` when nothing failed
    pub fn from_entries(entries: &[FailedEntry], limit: usize) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }

        let shown: Vec<String> = entries.iter().take(limit).map(|entry| entry.path.clone()).collect();
        Some(Self {
            total: entries.len(),
            remaining: entries.len() - shown.len(),
            shown,
        })
    }

    /// `+N more` when the list was truncated
    pub fn overflow_label(&self) -> Option<String> {
        (self.remaining > 0).then(|| format!("+{} more", self.remaining))
    }
}

impl fmt::Display for FailureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to download {} file(s):", self.total)?;
        for path in &self.shown {
            write!(f, "\n{}", path)?;
        }
        if let Some(label) = self.overflow_label() {
            write!(f, "\n{}", label)?;
        }
        Ok(())
    }
}

/// Everything the caller needs to show after a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub result: SyncResult,
    pub plan: PlanSummary,
    pub failures: Option<FailureSummary>,
}

impl SessionReport {
    pub fn success(&self) -> bool {
        self.result.success
    }
}

/// Orchestrates a single sync; holds no state between runs
pub struct SyncSession {
    source: Arc<dyn ManifestSource>,
    scheduler: DownloadScheduler,
    failure_limit: usize,
}

impl SyncSession {
    pub fn new(source: Arc<dyn ManifestSource>, scheduler: DownloadScheduler) -> Self {
        Self {
            source,
            scheduler,
            failure_limit: FAILURE_REPORT_LIMIT,
        }
    }

    pub fn with_failure_limit(mut self, limit: usize) -> Self {
        self.failure_limit = limit;
        self
    }

    /// Manifest failures and an unusable local root are returned as errors.
    /// Everything else, cancellation included, ends up in the report.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SessionReport> {
        let local_root = self.scheduler.config().local_root.clone();
        info!(local_root = %local_root.display(), "Start - verify client files");

        let manifest = self.source.fetch_manifest().await?;
        manifest.validate()?;

        let plan = match plan_blocking(Arc::new(manifest), local_root, cancel.clone()).await {
            Ok(plan) => plan,
            Err(SyncError::Cancelled) => {
                info!("Verification cancelled while planning");
                return Ok(SessionReport {
                    result: SyncResult {
                        success: false,
                        cancelled: true,
                        ..SyncResult::up_to_date()
                    },
                    plan: PlanSummary::default(),
                    failures: None,
                });
            }
            Err(e) => return Err(e),
        };

        info!(
            checked = plan.summary.files_checked,
            to_download = plan.summary.files_to_download,
            bytes = plan.summary.bytes_to_download,
            "Client file plan ready"
        );

        if plan.is_empty() {
            info!("End - verify client files, nothing to download");
            return Ok(SessionReport {
                result: SyncResult::up_to_date(),
                plan: plan.summary,
                failures: None,
            });
        }

        let summary = plan.summary.clone();
        let result = self.scheduler.execute(plan.tasks, cancel).await?;
        let failures = FailureSummary::from_entries(&result.failed_entries, self.failure_limit);

        if let Some(failures) = &failures {
            warn!(failed = failures.total, "{}", failures);
        }
        info!(success = result.success, "End - verify client files");

        Ok(SessionReport {
            result,
            plan: summary,
            failures,
        })
    }
}
