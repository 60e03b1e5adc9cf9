//! Report archive background job.
//!
//! Moves weekly reports older than the retention period into the archive
//! table in fixed-size batches, then purges expired archived reports.

use crate::archive::ArchiveService;
use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use chrono::Utc;

pub struct ReportArchiveJob {
    service: ArchiveService,
    schedule: JobSchedule,
}

impl ReportArchiveJob {
    pub fn new(service: ArchiveService, schedule: JobSchedule) -> Self {
        Self { service, schedule }
    }
}

impl BackgroundJob for ReportArchiveJob {
    fn id(&self) -> &'static str {
        "report_archive"
    }

    fn name(&self) -> &'static str {
        "Report Archive"
    }

    fn description(&self) -> &'static str {
        "Move weekly reports past their retention period into the archive"
    }

    fn schedule(&self) -> JobSchedule {
        self.schedule.clone()
    }

    fn validate(&self) -> Result<(), String> {
        self.service.settings().validate()
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.check_cancelled()?;

        let summary = self
            .service
            .run(Utc::now(), &ctx.cancellation_token)
            .map_err(JobError::failed)?;

        if summary.failed_batches > 0 {
            return Err(JobError::ExecutionFailed(format!(
                "{} of {} archive batches failed",
                summary.failed_batches,
                summary.failed_batches + summary.committed_batches
            )));
        }
        if summary.cancelled {
            return Err(JobError::Cancelled);
        }
        if summary.purge_failed {
            return Err(JobError::ExecutionFailed(
                "failed to purge expired archived reports".to_string(),
            ));
        }
        Ok(())
    }
}
