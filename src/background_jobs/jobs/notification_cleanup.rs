//! Notification record cleanup background job.
//!
//! Deletes delivery records older than the retention period. Alerts are
//! never touched, so a cleaned up alert is not notified again.

use crate::archive::MAX_RETENTION_DAYS;
use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::notifications::NotificationStore;
use chrono::{DateTime, Days, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationCleanupSettings {
    pub schedule: JobSchedule,
    pub retention_days: u32,
}

impl Default for NotificationCleanupSettings {
    fn default() -> Self {
        Self {
            schedule: JobSchedule::Interval(DEFAULT_CLEANUP_INTERVAL),
            retention_days: 30,
        }
    }
}

pub struct NotificationCleanupJob {
    store: Arc<dyn NotificationStore>,
    settings: NotificationCleanupSettings,
}

impl NotificationCleanupJob {
    pub fn new(store: Arc<dyn NotificationStore>, settings: NotificationCleanupSettings) -> Self {
        Self { store, settings }
    }
}

impl BackgroundJob for NotificationCleanupJob {
    fn id(&self) -> &'static str {
        "notification_cleanup"
    }

    fn name(&self) -> &'static str {
        "Notification Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete notification records past their retention period"
    }

    fn schedule(&self) -> JobSchedule {
        self.settings.schedule.clone()
    }

    fn validate(&self) -> Result<(), String> {
        match self.settings.retention_days {
            0 => Err("retention_days must be greater than 0".to_string()),
            days if days > MAX_RETENTION_DAYS => Err(format!(
                "retention_days must be at most {}, got {}",
                MAX_RETENTION_DAYS, days
            )),
            _ => Ok(()),
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.check_cancelled()?;

        let cutoff = Utc::now()
            .checked_sub_days(Days::new(u64::from(self.settings.retention_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self
            .store
            .delete_notifications_before(cutoff)
            .map_err(JobError::failed)?;

        info!(
            "Deleted {} notification records sent before {}",
            deleted, cutoff
        );
        Ok(())
    }
}
