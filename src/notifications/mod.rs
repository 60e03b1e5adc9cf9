//! Outbound notifications for newly raised alerts.

mod dispatcher;
mod models;
mod senders;
mod sqlite_notification_store;

pub use dispatcher::NotificationDispatcher;
pub use models::{DeliveryStatus, DispatchSummary, NotificationRecord};
pub use senders::{AlertPayload, LogNotificationSender, WebhookNotificationSender};
pub use sqlite_notification_store::SqliteNotificationStore;

use crate::alerts::Alert;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Delivers one alert over one channel. Called from blocking job threads.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> &str;

    fn send(&self, alert: &Alert) -> Result<()>;
}

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait NotificationStore: Send + Sync {
    fn record_notification(
        &self,
        alert_id: i64,
        channel: &str,
        sent_at: DateTime<Utc>,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<NotificationRecord>;

    fn list_notifications_for_alert(&self, alert_id: i64) -> Result<Vec<NotificationRecord>>;

    /// Deletes records sent before `cutoff`. Returns how many.
    fn delete_notifications_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
