mod file_config;

pub use file_config::{
    AlertDetectionConfig, FileConfig, NotificationCleanupConfig, NotificationsConfig,
    ReportArchiveConfig,
};

use crate::archive::ArchiveSettings;
use crate::background_jobs::jobs::{
    AlertDetectionSettings, NotificationCleanupSettings, DEFAULT_CLEANUP_INTERVAL,
};
use crate::background_jobs::{JobSchedule, DEFAULT_SHUTDOWN_GRACE, DEFAULT_SHUTDOWN_NOTICE};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub webhook_url: Option<String>,
    pub detection_interval_minutes: u64,
    pub archive_interval_hours: u64,
    pub retention_days: u32,
    pub run_detection_on_startup: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            webhook_url: None,
            detection_interval_minutes: 60,
            archive_interval_hours: 24,
            retention_days: 365,
            run_detection_on_startup: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub shutdown_grace: Duration,
    pub shutdown_notice: Duration,

    pub alert_detection: AlertDetectionSettings,
    pub report_archive: ReportArchiveSettings,
    pub notification_cleanup: NotificationCleanupSettings,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArchiveSettings {
    pub schedule: JobSchedule,
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    /// Alerts are only logged when unset.
    pub webhook_url: Option<String>,
    pub timeout: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let shutdown_grace = file
            .shutdown_grace_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE);
        let shutdown_notice = file
            .shutdown_notice_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SHUTDOWN_NOTICE);
        if shutdown_notice > shutdown_grace {
            bail!(
                "shutdown_notice_secs ({}) must not exceed shutdown_grace_secs ({})",
                shutdown_notice.as_secs(),
                shutdown_grace.as_secs()
            );
        }

        let detection_file = file.alert_detection.unwrap_or_default();
        let alert_detection = AlertDetectionSettings {
            schedule: resolve_schedule(
                "alert_detection",
                detection_file
                    .interval_minutes
                    .map(|minutes| scaled_secs("interval_minutes", minutes, 60))
                    .transpose()?,
                detection_file.cron,
                scaled_secs(
                    "--detection-interval-minutes",
                    cli.detection_interval_minutes,
                    60,
                )?,
            )?,
            lookback_weeks: detection_file.lookback_weeks.unwrap_or(4),
            run_on_startup: detection_file
                .run_on_startup
                .unwrap_or(cli.run_detection_on_startup),
        };

        let archive_file = file.report_archive.unwrap_or_default();
        let archive_defaults = ArchiveSettings::default();
        let report_archive = ReportArchiveSettings {
            schedule: resolve_schedule(
                "report_archive",
                archive_file
                    .interval_hours
                    .map(|hours| scaled_secs("interval_hours", hours, 60 * 60))
                    .transpose()?,
                archive_file.cron,
                scaled_secs(
                    "--archive-interval-hours",
                    cli.archive_interval_hours,
                    60 * 60,
                )?,
            )?,
            archive: ArchiveSettings {
                retention_days: archive_file.retention_days.unwrap_or(cli.retention_days),
                batch_size: archive_file
                    .batch_size
                    .unwrap_or(archive_defaults.batch_size),
                max_records: archive_file.max_records,
                archive_retention_days: archive_file
                    .archive_retention_days
                    .unwrap_or(archive_defaults.archive_retention_days),
            },
        };

        let cleanup_file = file.notification_cleanup.unwrap_or_default();
        let cleanup_defaults = NotificationCleanupSettings::default();
        let notification_cleanup = NotificationCleanupSettings {
            schedule: resolve_schedule(
                "notification_cleanup",
                cleanup_file
                    .interval_hours
                    .map(|hours| scaled_secs("interval_hours", hours, 60 * 60))
                    .transpose()?,
                cleanup_file.cron,
                DEFAULT_CLEANUP_INTERVAL,
            )?,
            retention_days: cleanup_file
                .retention_days
                .unwrap_or(cleanup_defaults.retention_days),
        };

        let notifications_file = file.notifications.unwrap_or_default();
        let notifications = NotificationSettings {
            webhook_url: notifications_file
                .webhook_url
                .or_else(|| cli.webhook_url.clone()),
            timeout: Duration::from_secs(notifications_file.timeout_secs.unwrap_or(10)),
        };

        Ok(Self {
            db_dir,
            shutdown_grace,
            shutdown_notice,
            alert_detection,
            report_archive,
            notification_cleanup,
            notifications,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir.join("timesheet.db")
    }
}

/// `value` units of `unit_secs` seconds each.
fn scaled_secs(name: &str, value: u64, unit_secs: u64) -> Result<Duration> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("{} is too large: {}", name, value))
}

/// A job section may set an interval or a cron expression, not both. The CLI
/// interval applies when neither is set.
fn resolve_schedule(
    section: &str,
    interval: Option<Duration>,
    cron: Option<String>,
    cli_interval: Duration,
) -> Result<JobSchedule> {
    match (interval, cron) {
        (Some(_), Some(_)) => bail!(
            "[{}] sets both an interval and a cron expression, pick one",
            section
        ),
        (Some(interval), None) => Ok(JobSchedule::Interval(interval)),
        (None, Some(cron)) => Ok(JobSchedule::Cron(cron)),
        (None, None) => Ok(JobSchedule::Interval(cli_interval)),
    }
}
