use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub shutdown_grace_secs: Option<u64>,
    pub shutdown_notice_secs: Option<u64>,

    // Job configs
    pub alert_detection: Option<AlertDetectionConfig>,
    pub report_archive: Option<ReportArchiveConfig>,
    pub notification_cleanup: Option<NotificationCleanupConfig>,
    pub notifications: Option<NotificationsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AlertDetectionConfig {
    pub interval_minutes: Option<u64>,
    /// 5 or 6 field cron expression, UTC. Mutually exclusive with the interval.
    pub cron: Option<String>,
    pub lookback_weeks: Option<u32>,
    pub run_on_startup: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReportArchiveConfig {
    pub interval_hours: Option<u64>,
    pub cron: Option<String>,
    pub retention_days: Option<u32>,
    pub batch_size: Option<usize>,
    pub max_records: Option<usize>,
    /// Archived copies older than this are purged.
    pub archive_retention_days: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NotificationCleanupConfig {
    pub interval_hours: Option<u64>,
    pub cron: Option<String>,
    pub retention_days: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
