//! Moves weekly reports past their retention period into the archive table,
//! and purges archived reports once they outlive the archive retention.

mod service;
mod sqlite_archive_store;

pub use service::{ArchiveRunSummary, ArchiveService, ArchiveSettings, MAX_RETENTION_DAYS};
pub use sqlite_archive_store::SqliteArchiveStore;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait ArchiveStore: Send + Sync {
    /// Ids of reports whose week ended before `cutoff`, oldest first.
    fn find_archivable_reports(&self, cutoff: NaiveDate, limit: Option<usize>) -> Result<Vec<i64>>;

    /// Copies the reports into the archive and deletes them, all or nothing.
    /// Returns the number of reports moved.
    fn move_batch(&self, report_ids: &[i64], archived_at: DateTime<Utc>) -> Result<usize>;

    /// Deletes archived reports archived before `cutoff`. Returns how many.
    fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Number of reports currently in the archive.
    fn archived_count(&self) -> Result<usize>;
}
