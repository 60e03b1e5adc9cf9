use super::models::{ConsecutivePeriods, NewWeeklyReport, ReportStatus, WeeklyReport};
use super::ReportStore;
use crate::sqlite_persistence::{
    format_date, format_datetime, invalid_value, lock_connection, parse_date, parse_datetime,
    SharedConnection,
};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rusqlite::{params, OptionalExtension};

const REPORT_COLUMNS: &str =
    "id, employee_id, department_id, period_start, period_end, submitted_at, status, work_hours";

pub struct SqliteReportStore {
    conn: SharedConnection,
}

impl SqliteReportStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub(crate) fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<WeeklyReport> {
        let status_str: String = row.get("status")?;
        let status =
            ReportStatus::parse(&status_str).ok_or_else(|| invalid_value("status", &status_str))?;
        let submitted_at: Option<String> = row.get("submitted_at")?;

        Ok(WeeklyReport {
            id: row.get("id")?,
            employee_id: row.get("employee_id")?,
            department_id: row.get("department_id")?,
            period_start: parse_date(&row.get::<_, String>("period_start")?)?,
            period_end: parse_date(&row.get::<_, String>("period_end")?)?,
            submitted_at: submitted_at.as_deref().map(parse_datetime).transpose()?,
            status,
            work_hours: row.get("work_hours")?,
        })
    }

    fn latest_submitted(
        conn: &rusqlite::Connection,
        employee_id: &str,
        period_start: Option<NaiveDate>,
    ) -> Result<Option<WeeklyReport>> {
        let sql = format!(
            "SELECT {} FROM weekly_reports
             WHERE employee_id = ?1 AND status IN ('submitted', 'approved')
               AND (?2 IS NULL OR period_start = ?2)
             ORDER BY period_start DESC LIMIT 1",
            REPORT_COLUMNS
        );
        let report = conn
            .query_row(
                &sql,
                params![employee_id, period_start.as_ref().map(format_date)],
                Self::row_to_report,
            )
            .optional()?;
        Ok(report)
    }
}

impl ReportStore for SqliteReportStore {
    fn fetch_reports_for_period(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeeklyReport>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM weekly_reports
             WHERE period_end >= ?1 AND period_start <= ?2
             ORDER BY employee_id, period_start",
            REPORT_COLUMNS
        ))?;

        let reports = stmt
            .query_map(
                params![format_date(&start), format_date(&end)],
                Self::row_to_report,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read weekly reports")?;

        Ok(reports)
    }

    fn fetch_consecutive_periods(&self, employee_id: &str) -> Result<Option<ConsecutivePeriods>> {
        let conn = lock_connection(&self.conn)?;

        let Some(current) = Self::latest_submitted(&conn, employee_id, None)? else {
            return Ok(None);
        };
        let previous_start = current.period_start - Duration::weeks(1);
        let previous = Self::latest_submitted(&conn, employee_id, Some(previous_start))?;

        Ok(previous.map(|previous| ConsecutivePeriods { current, previous }))
    }

    fn insert_report(&self, report: &NewWeeklyReport) -> Result<WeeklyReport> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT INTO weekly_reports
                (employee_id, department_id, period_start, period_end, submitted_at, status, work_hours)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.employee_id,
                report.department_id,
                format_date(&report.period_start),
                format_date(&report.period_end),
                report.submitted_at.as_ref().map(format_datetime),
                report.status.as_str(),
                report.work_hours,
            ],
        )
        .with_context(|| {
            format!(
                "Failed to insert report for {} week of {}",
                report.employee_id, report.period_start
            )
        })?;

        Ok(WeeklyReport {
            id: conn.last_insert_rowid(),
            employee_id: report.employee_id.clone(),
            department_id: report.department_id.clone(),
            period_start: report.period_start,
            period_end: report.period_end,
            submitted_at: report.submitted_at,
            status: report.status,
            work_hours: report.work_hours,
        })
    }
}
