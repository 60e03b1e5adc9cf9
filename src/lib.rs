//! Timesheet Alerts Library
//!
//! Batch daemon that raises alerts about weekly timesheet reports, notifies
//! them and archives old reports. Modules are exposed for the daemon binary
//! and integration tests.

pub mod alerts;
pub mod archive;
pub mod background_jobs;
pub mod config;
pub mod job_runs;
pub mod notifications;
pub mod reports;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use alerts::{AlertService, SqliteAlertStore};
pub use background_jobs::{JobScheduler, ShutdownReport};
pub use reports::{ReportStore, SqliteReportStore};
