use super::context::JobContext;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSchedule {
    /// Cron expression in UTC, 5 fields (minute first) or 6 (seconds first).
    Cron(String),
    /// Fixed period, first tick one period after start.
    Interval(Duration),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Job was cancelled")]
    Cancelled,
}

impl JobError {
    /// Wraps any error, keeping its full context chain in the message.
    pub fn failed(err: impl fmt::Display) -> Self {
        JobError::ExecutionFailed(format!("{:#}", err))
    }
}

/// A unit of recurring work owned by the scheduler.
///
/// `execute` runs on a blocking thread and may take as long as it needs, but
/// it should poll `ctx.check_cancelled()` between batches so a stop request
/// is honoured within one batch.
pub trait BackgroundJob: Send + Sync {
    /// Stable key, also used for the run history.
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn schedule(&self) -> JobSchedule;

    /// Interval jobs only: fire once immediately instead of after one period.
    fn run_on_startup(&self) -> bool {
        false
    }

    /// Rejects settings the job cannot run with. Checked for every job
    /// before the scheduler spawns anything.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
