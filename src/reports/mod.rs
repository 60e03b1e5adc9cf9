//! Weekly timesheet reports, read by detection and moved by archival.

mod models;
mod sqlite_report_store;

pub use models::{
    ConsecutivePeriods, NewWeeklyReport, ReportStatus, ReportWindow, WeeklyReport,
};
pub use sqlite_report_store::SqliteReportStore;

use anyhow::Result;
use chrono::NaiveDate;

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait ReportStore: Send + Sync {
    /// Reports whose week overlaps `[start, end]`, ordered by employee then period.
    fn fetch_reports_for_period(&self, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<WeeklyReport>>;

    /// The employee's most recent submitted week and the submitted week
    /// immediately before it. `None` when either one is missing.
    fn fetch_consecutive_periods(&self, employee_id: &str) -> Result<Option<ConsecutivePeriods>>;

    fn insert_report(&self, report: &NewWeeklyReport) -> Result<WeeklyReport>;
}
