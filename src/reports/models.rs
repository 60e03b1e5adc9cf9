use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    Submitted,
    Approved,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Submitted => "submitted",
            ReportStatus::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ReportStatus::Draft),
            "submitted" => Some(ReportStatus::Submitted),
            "approved" => Some(ReportStatus::Approved),
            _ => None,
        }
    }

    /// Submitted and approved reports carry hours the rules can trust.
    pub fn is_submitted(&self) -> bool {
        matches!(self, ReportStatus::Submitted | ReportStatus::Approved)
    }
}

/// One employee's timesheet for a Monday-to-Sunday week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub id: i64,
    pub employee_id: String,
    pub department_id: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: ReportStatus,
    pub work_hours: f64,
}

/// A report that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWeeklyReport {
    pub employee_id: String,
    pub department_id: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: ReportStatus,
    pub work_hours: f64,
}

/// An employee's latest submitted week together with the week right before it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsecutivePeriods {
    pub current: WeeklyReport,
    pub previous: WeeklyReport,
}

/// Inclusive date range used to select reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportWindow {
    /// The `weeks` weeks ending on `today`, clamped to the earliest
    /// representable date.
    pub fn lookback(today: NaiveDate, weeks: u32) -> Self {
        Self {
            start: today
                .checked_sub_days(Days::new(u64::from(weeks) * 7))
                .unwrap_or(NaiveDate::MIN),
            end: today,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_submission() {
        for status in [
            ReportStatus::Draft,
            ReportStatus::Submitted,
            ReportStatus::Approved,
        ] {
            assert_eq!(ReportStatus::parse(status.as_str()), Some(status));
        }
        assert!(ReportStatus::parse("pending").is_none());
        assert!(!ReportStatus::Draft.is_submitted());
        assert!(ReportStatus::Approved.is_submitted());
    }

    #[test]
    fn test_lookback_window() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        let window = ReportWindow::lookback(today, 4);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(window.end, today);
    }

    #[test]
    fn test_lookback_window_clamps_instead_of_overflowing() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        let window = ReportWindow::lookback(today, u32::MAX);
        assert_eq!(window.start, NaiveDate::MIN);
        assert_eq!(window.end, today);
    }
}
