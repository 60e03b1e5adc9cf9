use super::ArchiveStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One hundred years.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSettings {
    pub retention_days: u32,
    pub batch_size: usize,
    /// Cap on reports considered per run.
    pub max_records: Option<usize>,
    /// Archived reports are purged this many days after they were archived.
    pub archive_retention_days: u32,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            retention_days: 365,
            batch_size: 100,
            max_records: None,
            archive_retention_days: 5 * 365,
        }
    }
}

fn check_days(name: &str, days: u32) -> Result<(), String> {
    if days == 0 {
        return Err(format!("{} must be greater than 0", name));
    }
    if days > MAX_RETENTION_DAYS {
        return Err(format!(
            "{} must be at most {}, got {}",
            name, MAX_RETENTION_DAYS, days
        ));
    }
    Ok(())
}

impl ArchiveSettings {
    pub fn validate(&self) -> Result<(), String> {
        check_days("retention_days", self.retention_days)?;
        check_days("archive_retention_days", self.archive_retention_days)?;
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        if self.max_records == Some(0) {
            return Err("max_records must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveRunSummary {
    pub candidates: usize,
    pub archived: usize,
    pub committed_batches: usize,
    pub failed_batches: usize,
    pub cancelled: bool,
    /// Expired archive rows deleted after the batches.
    pub purged: usize,
    pub purge_failed: bool,
}

pub struct ArchiveService {
    store: Arc<dyn ArchiveStore>,
    settings: ArchiveSettings,
}

impl ArchiveService {
    pub fn new(store: Arc<dyn ArchiveStore>, settings: ArchiveSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    /// Archives reports whose week ended more than `retention_days` before
    /// `now`, one transaction per batch, then purges archived reports older
    /// than `archive_retention_days`.
    ///
    /// A failed batch is logged and skipped; earlier batches stay committed
    /// and the skipped rows are picked up again by the next run. A cancelled
    /// run does not purge.
    pub fn run(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<ArchiveRunSummary> {
        let cutoff = now
            .date_naive()
            .checked_sub_days(Days::new(u64::from(self.settings.retention_days)))
            .unwrap_or(NaiveDate::MIN);
        let ids = self
            .store
            .find_archivable_reports(cutoff, self.settings.max_records)
            .context("Failed to select reports to archive")?;

        let mut summary = ArchiveRunSummary {
            candidates: ids.len(),
            ..Default::default()
        };

        for (index, batch) in ids.chunks(self.settings.batch_size).enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    "Archive cancelled after {} of {} reports",
                    summary.archived, summary.candidates
                );
                summary.cancelled = true;
                return Ok(summary);
            }

            match self.store.move_batch(batch, now) {
                Ok(moved) => {
                    summary.archived += moved;
                    summary.committed_batches += 1;
                }
                Err(e) => {
                    summary.failed_batches += 1;
                    error!(
                        "Archive batch {} ({} reports) failed: {:#}",
                        index + 1,
                        batch.len(),
                        e
                    );
                }
            }
        }

        if summary.candidates == 0 {
            info!("No reports ended before {}, nothing to archive", cutoff);
        } else {
            info!(
                "Archived {} of {} reports ended before {} ({} batches committed, {} failed)",
                summary.archived,
                summary.candidates,
                cutoff,
                summary.committed_batches,
                summary.failed_batches
            );
        }

        self.purge_expired(now, &mut summary);
        Ok(summary)
    }

    fn purge_expired(&self, now: DateTime<Utc>, summary: &mut ArchiveRunSummary) {
        let purge_cutoff = now
            .checked_sub_days(Days::new(u64::from(self.settings.archive_retention_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.store.purge_archived_before(purge_cutoff) {
            Ok(purged) => {
                summary.purged = purged;
                if purged > 0 {
                    info!(
                        "Purged {} archived reports archived before {}",
                        purged, purge_cutoff
                    );
                }
            }
            Err(e) => {
                summary.purge_failed = true;
                error!("Failed to purge expired archived reports: {:#}", e);
            }
        }
    }
}
