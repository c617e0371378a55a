//! The storage custodian: retention and quota sweeps over the archive.
//!
//! Armed when the recordings subsystem comes up: a first sweep shortly
//! after start, a slow periodic cadence afterwards, and a quick extra sweep
//! whenever a recording completes successfully.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dto::{CleanupReport, StorageStats};
use crate::model::Recording;
use crate::persist::Store;

const FIRST_SWEEP_DELAY: Duration = Duration::from_secs(5);
const SWEEP_PERIOD: Duration = Duration::from_secs(3 * 60 * 60);
const COMPLETION_SWEEP_DELAY: Duration = Duration::from_secs(1);

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub struct Custodian {
    store: Arc<Store>,
}

impl Custodian {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Run the sweep schedule until cancelled. `completions` carries one
    /// message per successful recording completion.
    pub fn arm(
        self: Arc<Self>,
        mut completions: mpsc::UnboundedReceiver<()>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(FIRST_SWEEP_DELAY) => {}
                _ = cancel.cancelled() => return,
            }
            self.sweep().await;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SWEEP_PERIOD) => {
                        self.sweep().await;
                    }
                    nudge = completions.recv() => {
                        if nudge.is_none() {
                            return;
                        }
                        tokio::time::sleep(COMPLETION_SWEEP_DELAY).await;
                        self.sweep().await;
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        })
    }

    /// One full sweep: retention purge first, then the quota purge.
    /// Idempotent while no files change underneath it.
    pub async fn sweep(&self) -> CleanupReport {
        let settings = self.store.settings().await;
        let mut report = CleanupReport::default();

        if settings.auto_delete_after_days > 0 {
            let cutoff = Utc::now() - chrono::Duration::days(settings.auto_delete_after_days as i64);
            let expired: Vec<Recording> = self
                .store
                .recordings()
                .await
                .into_iter()
                .filter(|r| r.success == Some(true))
                .filter(|r| r.completed_at.is_some_and(|done| done < cutoff))
                .collect();
            for rec in expired {
                if self.delete_recording_file(&rec).await {
                    report.deleted_old += 1;
                }
            }
        }

        if settings.max_storage_gb > 0.0 {
            let cap_bytes = (settings.max_storage_gb * BYTES_PER_GB) as u64;
            let mut successful: Vec<(Recording, u64)> = self
                .store
                .recordings()
                .await
                .into_iter()
                .filter(|r| r.success == Some(true))
                .map(|r| {
                    let size = r
                        .output_path
                        .as_deref()
                        .and_then(|p| std::fs::metadata(p).ok())
                        .map(|m| m.len())
                        .unwrap_or(0);
                    (r, size)
                })
                .collect();
            let mut total: u64 = successful.iter().map(|(_, size)| size).sum();
            // Oldest completions go first.
            successful.sort_by_key(|(r, _)| r.completed_at);
            for (rec, size) in successful {
                if total <= cap_bytes {
                    break;
                }
                if self.delete_recording_file(&rec).await {
                    report.deleted_for_space += 1;
                    total = total.saturating_sub(size);
                }
            }
        }

        report.current_storage_gb = self.used_bytes().await as f64 / BYTES_PER_GB;
        if report.deleted_old + report.deleted_for_space > 0 {
            info!(
                "sweep removed {} expired and {} over-quota recordings, {:.3} GB in use",
                report.deleted_old, report.deleted_for_space, report.current_storage_gb
            );
        } else {
            debug!("sweep found nothing to remove");
        }
        report
    }

    pub async fn storage_stats(&self) -> StorageStats {
        let settings = self.store.settings().await;
        let used_gb = self.used_bytes().await as f64 / BYTES_PER_GB;
        let max_gb = settings.max_storage_gb;
        StorageStats {
            used_gb,
            max_gb,
            percentage: if max_gb > 0.0 {
                (used_gb / max_gb * 100.0).min(100.0)
            } else {
                0.0
            },
            auto_delete_days: settings.auto_delete_after_days,
        }
    }

    /// Delete the output file, then the row. A row whose file cannot be
    /// removed is kept so the archive never forgets a file it still owns.
    async fn delete_recording_file(&self, rec: &Recording) -> bool {
        if let Some(path) = rec.output_path.as_deref()
            && !remove_if_present(path)
        {
            warn!("[{}] keeping row, file not deletable", rec.id);
            return false;
        }
        match self.store.remove_recording(&rec.id).await {
            Ok(_) => true,
            Err(e) => {
                warn!("[{}] row not removed: {e}", rec.id);
                false
            }
        }
    }

    async fn used_bytes(&self) -> u64 {
        self.store
            .recordings()
            .await
            .iter()
            .filter(|r| r.success == Some(true))
            .filter_map(|r| r.output_path.as_deref())
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

fn remove_if_present(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("cannot delete {}: {e}", path.display());
            false
        }
    }
}
