//! Alert detection, reconciliation and lifecycle.

pub mod detection;
mod error;
mod models;
mod service;
mod sqlite_alert_store;

pub use detection::AlertDetectionEngine;
pub use error::AlertError;
pub use models::{
    Alert, AlertHistoryEntry, AlertSetting, AlertStatus, CandidateAlert, NewAlertHistoryEntry,
    ReconcileOutcome, RuleType, SettingScope, Severity, UpsertOutcome,
};
pub use service::{AlertService, SYSTEM_ACTOR};
pub use sqlite_alert_store::SqliteAlertStore;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

/// Persistence for alerts and their history.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait AlertStore: Send + Sync {
    fn find_open_alert(
        &self,
        rule_type: RuleType,
        employee_id: &str,
        period_start: NaiveDate,
    ) -> Result<Option<Alert>>;

    /// Refreshes the live alert for the candidate's key, or creates a new open
    /// alert together with its creation history entry, in one write transaction.
    /// A concurrent insert for the same key fails with
    /// [`AlertError::DuplicateOpenAlert`] inside the returned error.
    fn upsert_detection(
        &self,
        candidate: &CandidateAlert,
        detected_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome>;

    fn append_history(&self, entry: &NewAlertHistoryEntry) -> Result<AlertHistoryEntry>;

    fn get_alert(&self, id: i64) -> Result<Option<Alert>>;

    /// Alerts with the given status (all when `None`), newest first.
    fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>>;

    /// Moves the alert from `from` to `entry.to_status` and appends `entry`,
    /// only if the alert is still in `from`. Returns false when it was not.
    fn transition_status(&self, from: AlertStatus, entry: &NewAlertHistoryEntry) -> Result<bool>;

    /// History of one alert, oldest first.
    fn list_history(&self, alert_id: i64) -> Result<Vec<AlertHistoryEntry>>;
}

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait AlertSettingsStore: Send + Sync {
    fn get_settings(&self, rule_type: RuleType, scope: &SettingScope)
        -> Result<Option<AlertSetting>>;

    fn list_settings(&self, rule_type: RuleType) -> Result<Vec<AlertSetting>>;

    fn upsert_setting(&self, setting: &AlertSetting) -> Result<()>;
}
