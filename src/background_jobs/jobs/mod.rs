//! Specific background job implementations.

pub mod alert_detection;
pub mod notification_cleanup;
pub mod report_archive;

pub use alert_detection::{AlertDetectionJob, AlertDetectionSettings};
pub use notification_cleanup::{
    NotificationCleanupJob, NotificationCleanupSettings, DEFAULT_CLEANUP_INTERVAL,
};
pub use report_archive::ReportArchiveJob;
