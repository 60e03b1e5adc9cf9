//! Alert detection background job.
//!
//! Evaluates the alert rules over recent weekly reports, reconciles the
//! results with stored alerts and notifies the alerts raised by this run.

use crate::alerts::{AlertDetectionEngine, AlertService};
use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::notifications::NotificationDispatcher;
use crate::reports::ReportWindow;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Ten years of weekly reports.
pub const MAX_LOOKBACK_WEEKS: u32 = 520;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDetectionSettings {
    pub schedule: JobSchedule,
    /// Weeks of reports evaluated on each run.
    pub lookback_weeks: u32,
    pub run_on_startup: bool,
}

impl Default for AlertDetectionSettings {
    fn default() -> Self {
        Self {
            schedule: JobSchedule::Interval(Duration::from_secs(60 * 60)),
            lookback_weeks: 4,
            run_on_startup: false,
        }
    }
}

pub struct AlertDetectionJob {
    engine: AlertDetectionEngine,
    alerts: Arc<AlertService>,
    dispatcher: NotificationDispatcher,
    settings: AlertDetectionSettings,
}

impl AlertDetectionJob {
    pub fn new(
        engine: AlertDetectionEngine,
        alerts: Arc<AlertService>,
        dispatcher: NotificationDispatcher,
        settings: AlertDetectionSettings,
    ) -> Self {
        Self {
            engine,
            alerts,
            dispatcher,
            settings,
        }
    }
}

impl BackgroundJob for AlertDetectionJob {
    fn id(&self) -> &'static str {
        "alert_detection"
    }

    fn name(&self) -> &'static str {
        "Alert Detection"
    }

    fn description(&self) -> &'static str {
        "Detect unsubmitted, overworked and suddenly changed timesheets"
    }

    fn schedule(&self) -> JobSchedule {
        self.settings.schedule.clone()
    }

    fn run_on_startup(&self) -> bool {
        self.settings.run_on_startup
    }

    fn validate(&self) -> Result<(), String> {
        if self.settings.lookback_weeks == 0 {
            return Err("lookback_weeks must be greater than 0".to_string());
        }
        if self.settings.lookback_weeks > MAX_LOOKBACK_WEEKS {
            return Err(format!(
                "lookback_weeks must be at most {}, got {}",
                MAX_LOOKBACK_WEEKS, self.settings.lookback_weeks
            ));
        }
        Ok(())
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.check_cancelled()?;

        let now = Utc::now();
        let today = now.date_naive();
        let window = ReportWindow::lookback(today, self.settings.lookback_weeks);

        let candidates = self
            .engine
            .detect(window, today)
            .map_err(JobError::failed)?;

        ctx.check_cancelled()?;

        let outcome = self.alerts.reconcile(&candidates, now);

        // Created alerts are committed at this point, even when other
        // candidates failed; anything left unsent by cancellation is
        // reported as skipped.
        let dispatched = self
            .dispatcher
            .dispatch(&outcome.created, &ctx.cancellation_token);

        info!(
            "Detection from {} to {}: {} candidates, {} new, {} refreshed, {} failed, {} notified",
            window.start,
            window.end,
            candidates.len(),
            outcome.created.len(),
            outcome.updated.len(),
            outcome.failed.len(),
            dispatched.delivered
        );

        if let Some((_, first_error)) = outcome.failed.first() {
            return Err(JobError::ExecutionFailed(format!(
                "{} of {} candidates could not be stored, first error: {}",
                outcome.failed.len(),
                candidates.len(),
                first_error
            )));
        }
        if dispatched.skipped > 0 {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{
        Alert, AlertHistoryEntry, AlertStatus, AlertStore, CandidateAlert, NewAlertHistoryEntry,
        RuleType, SqliteAlertStore, UpsertOutcome,
    };
    use crate::job_runs::RunTrigger;
    use crate::notifications::{
        DeliveryStatus, NotificationSender, NotificationStore, SqliteNotificationStore,
    };
    use crate::reports::{NewWeeklyReport, ReportStatus, ReportStore, SqliteReportStore};
    use crate::sqlite_persistence::open_in_memory;
    use anyhow::anyhow;
    use chrono::{DateTime, Duration as ChronoDuration, NaiveDate};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct CountingSender {
        sent: AtomicUsize,
    }

    impl NotificationSender for CountingSender {
        fn channel(&self) -> &str {
            "test"
        }

        fn send(&self, _alert: &Alert) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails the first upsert for one employee, delegating everything else.
    struct FailFirstUpsertFor {
        inner: Arc<SqliteAlertStore>,
        employee_id: &'static str,
        failed: AtomicBool,
    }

    impl AlertStore for FailFirstUpsertFor {
        fn find_open_alert(
            &self,
            rule_type: RuleType,
            employee_id: &str,
            period_start: NaiveDate,
        ) -> anyhow::Result<Option<Alert>> {
            self.inner.find_open_alert(rule_type, employee_id, period_start)
        }

        fn upsert_detection(
            &self,
            candidate: &CandidateAlert,
            detected_at: DateTime<Utc>,
        ) -> anyhow::Result<UpsertOutcome> {
            if candidate.employee_id == self.employee_id
                && !self.failed.swap(true, Ordering::SeqCst)
            {
                return Err(anyhow!("database is locked"));
            }
            self.inner.upsert_detection(candidate, detected_at)
        }

        fn append_history(
            &self,
            entry: &NewAlertHistoryEntry,
        ) -> anyhow::Result<AlertHistoryEntry> {
            self.inner.append_history(entry)
        }

        fn get_alert(&self, id: i64) -> anyhow::Result<Option<Alert>> {
            self.inner.get_alert(id)
        }

        fn list_alerts(&self, status: Option<AlertStatus>) -> anyhow::Result<Vec<Alert>> {
            self.inner.list_alerts(status)
        }

        fn transition_status(
            &self,
            from: AlertStatus,
            entry: &NewAlertHistoryEntry,
        ) -> anyhow::Result<bool> {
            self.inner.transition_status(from, entry)
        }

        fn list_history(&self, alert_id: i64) -> anyhow::Result<Vec<AlertHistoryEntry>> {
            self.inner.list_history(alert_id)
        }
    }

    struct Fixture {
        job: AlertDetectionJob,
        alerts: Arc<AlertService>,
        reports: Arc<SqliteReportStore>,
        notifications: Arc<SqliteNotificationStore>,
    }

    fn fixture(sender: Arc<CountingSender>) -> Fixture {
        fixture_with_store(sender, |store| store)
    }

    fn fixture_with_store(
        sender: Arc<CountingSender>,
        wrap: impl FnOnce(Arc<SqliteAlertStore>) -> Arc<dyn AlertStore>,
    ) -> Fixture {
        let conn = open_in_memory().unwrap();
        let reports = Arc::new(SqliteReportStore::new(conn.clone()));
        let alert_store = Arc::new(SqliteAlertStore::new(conn.clone()));
        let notifications = Arc::new(SqliteNotificationStore::new(conn));

        let alerts = Arc::new(AlertService::new(wrap(alert_store.clone()), alert_store.clone()));
        let engine = AlertDetectionEngine::new(reports.clone(), alert_store);
        let dispatcher = NotificationDispatcher::new(sender, notifications.clone());

        Fixture {
            job: AlertDetectionJob::new(
                engine,
                alerts.clone(),
                dispatcher,
                AlertDetectionSettings::default(),
            ),
            alerts,
            reports,
            notifications,
        }
    }

    fn insert_overdue_draft(reports: &SqliteReportStore, employee_id: &str) {
        let today = Utc::now().date_naive();
        let period_end = today - ChronoDuration::days(10);
        reports
            .insert_report(&NewWeeklyReport {
                employee_id: employee_id.to_string(),
                department_id: Some("eng".to_string()),
                period_start: period_end - ChronoDuration::days(6),
                period_end,
                submitted_at: None,
                status: ReportStatus::Draft,
                work_hours: 12.0,
            })
            .unwrap();
    }

    fn ctx(token: CancellationToken) -> JobContext {
        JobContext::new(token, "alert_detection", RunTrigger::Schedule)
    }

    #[test]
    fn test_job_metadata() {
        let f = fixture(Arc::default());
        assert_eq!(f.job.id(), "alert_detection");
        assert_eq!(f.job.name(), "Alert Detection");
        assert_eq!(
            f.job.schedule(),
            JobSchedule::Interval(Duration::from_secs(3600))
        );
        assert!(!f.job.run_on_startup());
        assert!(f.job.validate().is_ok());
    }

    #[test]
    fn test_zero_lookback_is_invalid() {
        let mut f = fixture(Arc::default());
        f.job.settings.lookback_weeks = 0;
        assert!(f.job.validate().is_err());
    }

    #[test]
    fn test_lookback_beyond_ten_years_is_invalid() {
        let mut f = fixture(Arc::default());
        f.job.settings.lookback_weeks = MAX_LOOKBACK_WEEKS;
        assert!(f.job.validate().is_ok());
        f.job.settings.lookback_weeks = u32::MAX;
        assert!(f.job.validate().unwrap_err().contains("at most 520"));
    }

    #[test]
    fn test_new_alert_is_notified_once_across_runs() {
        let sender = Arc::new(CountingSender::default());
        let f = fixture(sender.clone());
        insert_overdue_draft(&f.reports, "emp-1");

        f.job.execute(&ctx(CancellationToken::new())).unwrap();
        f.job.execute(&ctx(CancellationToken::new())).unwrap();

        let open = f.alerts.list_alerts(Some(AlertStatus::Open)).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].rule_type, RuleType::UnsubmittedReport);

        let records = f.notifications.list_notifications_for_alert(open[0].id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].delivery_status, DeliveryStatus::Delivered);
        assert_eq!(records[0].channel, "test");
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_alert_created_before_a_failed_candidate_is_still_notified() {
        let sender = Arc::new(CountingSender::default());
        let f = fixture_with_store(sender.clone(), |store| {
            Arc::new(FailFirstUpsertFor {
                inner: store,
                employee_id: "emp-b",
                failed: AtomicBool::new(false),
            })
        });
        insert_overdue_draft(&f.reports, "emp-a");
        insert_overdue_draft(&f.reports, "emp-b");

        let first = f.job.execute(&ctx(CancellationToken::new()));
        assert!(matches!(
            first,
            Err(JobError::ExecutionFailed(ref msg)) if msg.contains("1 of 2")
        ));
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);

        f.job.execute(&ctx(CancellationToken::new())).unwrap();
        assert_eq!(sender.sent.load(Ordering::SeqCst), 2);

        let open = f.alerts.list_alerts(Some(AlertStatus::Open)).unwrap();
        assert_eq!(open.len(), 2);
        for alert in open {
            let records = f.notifications.list_notifications_for_alert(alert.id).unwrap();
            assert_eq!(records.len(), 1, "alert for {}", alert.employee_id);
        }
    }

    #[test]
    fn test_cancelled_before_start_does_nothing() {
        let f = fixture(Arc::default());
        insert_overdue_draft(&f.reports, "emp-1");

        let token = CancellationToken::new();
        token.cancel();
        let result = f.job.execute(&ctx(token));

        assert!(matches!(result, Err(JobError::Cancelled)));
        assert!(f.alerts.list_alerts(None).unwrap().is_empty());
    }
}
