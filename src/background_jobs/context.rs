use super::job::JobError;
use crate::job_runs::RunTrigger;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Context provided to a job for one execution.
#[derive(Clone)]
pub struct JobContext {
    /// Cancelled when the scheduler is asked to stop.
    pub cancellation_token: CancellationToken,

    pub job_id: &'static str,

    pub triggered_by: RunTrigger,

    pub started_at: DateTime<Utc>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        job_id: &'static str,
        triggered_by: RunTrigger,
    ) -> Self {
        Self {
            cancellation_token,
            job_id,
            triggered_by,
            started_at: Utc::now(),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// `Err(JobError::Cancelled)` once cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }
}
