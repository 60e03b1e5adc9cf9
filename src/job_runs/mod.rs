//! Persistent history of background job executions.

mod models;
mod sqlite_job_run_store;

pub use models::{JobRun, JobRunStatus, RunTrigger};
pub use sqlite_job_run_store::SqliteJobRunStore;

use anyhow::Result;

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait JobRunStore: Send + Sync {
    /// Records a run as started and returns its id.
    fn record_job_start(&self, job_id: &str, trigger: RunTrigger) -> Result<i64>;

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;

    /// Most recent runs first.
    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;

    /// Marks runs left `running` by a previous process as failed.
    fn mark_stale_jobs_failed(&self) -> Result<usize>;
}
