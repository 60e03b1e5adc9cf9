use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use timesheet_alerts::alerts::{Alert, AlertDetectionEngine, AlertService, SqliteAlertStore};
use timesheet_alerts::archive::SqliteArchiveStore;
use timesheet_alerts::job_runs::SqliteJobRunStore;
use timesheet_alerts::notifications::{
    NotificationDispatcher, NotificationSender, SqliteNotificationStore,
};
use timesheet_alerts::reports::{
    NewWeeklyReport, ReportStatus, ReportStore, SqliteReportStore, WeeklyReport,
};
use timesheet_alerts::sqlite_persistence::{open_database, SharedConnection};

/// Remembers the ids of every alert it was asked to send.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<i64>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<i64> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationSender for RecordingSender {
    fn channel(&self) -> &str {
        "recording"
    }

    fn send(&self, alert: &Alert) -> Result<()> {
        self.sent.lock().unwrap().push(alert.id);
        Ok(())
    }
}

#[allow(dead_code)]
pub struct TestEnv {
    pub dir: TempDir,
    pub conn: SharedConnection,
    pub reports: Arc<SqliteReportStore>,
    pub alert_store: Arc<SqliteAlertStore>,
    pub notifications: Arc<SqliteNotificationStore>,
    pub archive: Arc<SqliteArchiveStore>,
    pub job_runs: Arc<SqliteJobRunStore>,
    pub alerts: Arc<AlertService>,
    pub sender: Arc<RecordingSender>,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let conn = open_database(dir.path().join("timesheet.db")).unwrap();

        let alert_store = Arc::new(SqliteAlertStore::new(conn.clone()));
        let alerts = Arc::new(AlertService::new(alert_store.clone(), alert_store.clone()));
        alerts.ensure_default_settings().unwrap();

        Self {
            reports: Arc::new(SqliteReportStore::new(conn.clone())),
            notifications: Arc::new(SqliteNotificationStore::new(conn.clone())),
            archive: Arc::new(SqliteArchiveStore::new(conn.clone())),
            job_runs: Arc::new(SqliteJobRunStore::new(conn.clone())),
            sender: Arc::new(RecordingSender::default()),
            alert_store,
            alerts,
            conn,
            dir,
        }
    }

    pub fn engine(&self) -> AlertDetectionEngine {
        AlertDetectionEngine::new(self.reports.clone(), self.alert_store.clone())
    }

    pub fn dispatcher(&self) -> NotificationDispatcher {
        NotificationDispatcher::new(self.sender.clone(), self.notifications.clone())
    }

    /// Inserts the Monday-to-Sunday week starting on `period_start`.
    pub fn insert_report(
        &self,
        employee_id: &str,
        department_id: Option<&str>,
        period_start: NaiveDate,
        status: ReportStatus,
        work_hours: f64,
    ) -> WeeklyReport {
        self.reports
            .insert_report(&NewWeeklyReport {
                employee_id: employee_id.to_string(),
                department_id: department_id.map(str::to_string),
                period_start,
                period_end: period_start + Duration::days(6),
                submitted_at: status.is_submitted().then(Utc::now),
                status,
                work_hours,
            })
            .unwrap()
    }

    pub fn weekly_report_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM weekly_reports", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap() as usize
    }
}

pub fn monday(year: i32, month: u32, day: u32) -> NaiveDate {
    let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
    assert_eq!(date.format("%a").to_string(), "Mon", "{} is not a Monday", date);
    date
}
