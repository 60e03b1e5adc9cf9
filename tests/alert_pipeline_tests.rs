//! Detection, reconciliation and notification over a real database.

mod common;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{monday, TestEnv};
use timesheet_alerts::alerts::{
    AlertError, AlertStatus, CandidateAlert, RuleType, SettingScope, Severity, SYSTEM_ACTOR,
};
use timesheet_alerts::background_jobs::jobs::{NotificationCleanupJob, NotificationCleanupSettings};
use timesheet_alerts::background_jobs::{BackgroundJob, JobContext};
use timesheet_alerts::job_runs::RunTrigger;
use timesheet_alerts::notifications::{DeliveryStatus, NotificationStore};
use timesheet_alerts::reports::{ReportStatus, ReportWindow};
use tokio_util::sync::CancellationToken;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 19).unwrap()
}

fn now() -> DateTime<Utc> {
    today().and_hms_opt(9, 0, 0).unwrap().and_utc()
}

fn detect(env: &TestEnv) -> Vec<CandidateAlert> {
    env.engine()
        .detect(ReportWindow::lookback(today(), 4), today())
        .unwrap()
}

#[test]
fn test_unsubmitted_report_past_grace_period() {
    let env = TestEnv::new();
    env.alerts
        .update_setting(RuleType::UnsubmittedReport, SettingScope::Global, 5.0, true)
        .unwrap();
    // Week ended on 2024-06-09, ten days before today.
    env.insert_report("emp-1", Some("eng"), monday(2024, 6, 3), ReportStatus::Draft, 0.0);

    let candidates = detect(&env);

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.rule_type, RuleType::UnsubmittedReport);
    assert_eq!(candidate.employee_id, "emp-1");
    assert_eq!(candidate.period_start, monday(2024, 6, 3));
    assert_eq!(candidate.detected_value, 10.0);
    assert_eq!(candidate.threshold_value, 5.0);
    assert_eq!(candidate.severity, Severity::Low);
}

#[test]
fn test_sudden_change_between_consecutive_weeks() {
    let env = TestEnv::new();
    env.insert_report("emp-2", Some("eng"), monday(2024, 6, 3), ReportStatus::Approved, 30.0);
    env.insert_report("emp-2", Some("eng"), monday(2024, 6, 10), ReportStatus::Submitted, 60.0);

    let candidates = detect(&env);

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.rule_type, RuleType::SuddenChange);
    assert_eq!(candidate.period_start, monday(2024, 6, 10));
    assert_eq!(candidate.detected_value, 30.0);
    assert_eq!(candidate.threshold_value, 20.0);
    assert_eq!(candidate.severity, Severity::Medium);
}

#[test]
fn test_detection_is_deterministic() {
    let env = TestEnv::new();
    env.insert_report("emp-b", None, monday(2024, 5, 27), ReportStatus::Draft, 0.0);
    env.insert_report("emp-a", None, monday(2024, 6, 3), ReportStatus::Submitted, 80.0);
    env.insert_report("emp-a", None, monday(2024, 6, 10), ReportStatus::Submitted, 20.0);

    let first = detect(&env);
    let second = detect(&env);

    assert_eq!(first, second);
    let keys: Vec<(&str, RuleType)> = first
        .iter()
        .map(|c| (c.employee_id.as_str(), c.rule_type))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("emp-a", RuleType::Overwork),
            ("emp-a", RuleType::SuddenChange),
            ("emp-b", RuleType::UnsubmittedReport),
        ]
    );
}

#[test]
fn test_repeated_runs_keep_one_open_alert_and_notify_once() {
    let env = TestEnv::new();
    env.insert_report("emp-1", None, monday(2024, 6, 3), ReportStatus::Submitted, 75.0);
    let dispatcher = env.dispatcher();
    let token = CancellationToken::new();

    let first = env.alerts.reconcile(&detect(&env), now());
    dispatcher.dispatch(&first.created, &token);
    let second = env.alerts.reconcile(&detect(&env), now());
    dispatcher.dispatch(&second.created, &token);

    assert_eq!(first.created.len(), 1);
    assert!(first.updated.is_empty());
    assert!(second.created.is_empty());
    assert_eq!(second.updated.len(), 1);
    assert_eq!(second.updated[0].id, first.created[0].id);

    let open = env.alerts.list_alerts(Some(AlertStatus::Open)).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].rule_type, RuleType::Overwork);
    assert_eq!(open[0].severity, Severity::High);

    assert_eq!(env.sender.sent(), vec![open[0].id]);
    let records = env
        .notifications
        .list_notifications_for_alert(open[0].id)
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].delivery_status, DeliveryStatus::Delivered);
}

#[test]
fn test_cleanup_drops_old_records_without_renotifying() {
    let env = TestEnv::new();
    env.insert_report("emp-1", None, monday(2024, 6, 3), ReportStatus::Submitted, 75.0);
    let created = env.alerts.reconcile(&detect(&env), now()).created;
    let id = created[0].id;
    env.notifications
        .record_notification(
            id,
            "recording",
            Utc::now() - Duration::days(45),
            DeliveryStatus::Delivered,
            None,
        )
        .unwrap();

    let job = NotificationCleanupJob::new(
        env.notifications.clone(),
        NotificationCleanupSettings::default(),
    );
    let ctx = JobContext::new(
        CancellationToken::new(),
        "notification_cleanup",
        RunTrigger::Schedule,
    );
    job.execute(&ctx).unwrap();

    assert!(env
        .notifications
        .list_notifications_for_alert(id)
        .unwrap()
        .is_empty());

    // The alert is still open, so the next run refreshes it silently.
    let outcome = env.alerts.reconcile(&detect(&env), now());
    env.dispatcher().dispatch(&outcome.created, &CancellationToken::new());
    assert!(outcome.created.is_empty());
    assert_eq!(outcome.updated[0].id, id);
    assert!(env.sender.sent().is_empty());
}

#[test]
fn test_resolved_alert_is_terminal_and_frees_its_key() {
    let env = TestEnv::new();
    env.insert_report("emp-1", None, monday(2024, 6, 3), ReportStatus::Draft, 0.0);

    let created = env.alerts.reconcile(&detect(&env), now()).created;
    assert_eq!(created.len(), 1);
    let id = created[0].id;

    let acknowledged = env
        .alerts
        .acknowledge(id, "manager-7", Some("chasing".to_string()))
        .unwrap();
    assert_eq!(acknowledged.status, AlertStatus::Acknowledged);

    // Still live while acknowledged: detection refreshes it.
    let outcome = env.alerts.reconcile(&detect(&env), now());
    assert!(outcome.created.is_empty());
    assert_eq!(outcome.updated[0].id, id);
    assert_eq!(outcome.updated[0].status, AlertStatus::Acknowledged);

    env.alerts.resolve(id, "manager-7", None).unwrap();
    let err = env.alerts.acknowledge(id, "manager-7", None).unwrap_err();
    assert!(matches!(
        err,
        AlertError::InvalidTransition {
            from: AlertStatus::Resolved,
            to: AlertStatus::Acknowledged,
            ..
        }
    ));

    let history = env.alerts.history(id).unwrap();
    let steps: Vec<(Option<AlertStatus>, AlertStatus, &str)> = history
        .iter()
        .map(|h| (h.from_status, h.to_status, h.actor.as_str()))
        .collect();
    assert_eq!(
        steps,
        vec![
            (None, AlertStatus::Open, SYSTEM_ACTOR),
            (Some(AlertStatus::Open), AlertStatus::Acknowledged, "manager-7"),
            (Some(AlertStatus::Acknowledged), AlertStatus::Resolved, "manager-7"),
        ]
    );

    // The condition persists, so the next run raises a fresh alert.
    let outcome = env.alerts.reconcile(&detect(&env), now());
    assert_eq!(outcome.created.len(), 1);
    assert_ne!(outcome.created[0].id, id);
}

#[test]
fn test_scoped_settings_override_global_ones() {
    let env = TestEnv::new();
    env.alerts
        .update_setting(
            RuleType::Overwork,
            SettingScope::Department("ops".to_string()),
            45.0,
            true,
        )
        .unwrap();
    env.alerts
        .update_setting(
            RuleType::UnsubmittedReport,
            SettingScope::Employee("emp-late".to_string()),
            3.0,
            false,
        )
        .unwrap();

    let overwork_scopes: Vec<SettingScope> = env
        .alerts
        .settings_for(RuleType::Overwork)
        .unwrap()
        .into_iter()
        .map(|s| s.scope)
        .collect();
    assert_eq!(overwork_scopes.len(), 2);
    assert!(overwork_scopes.contains(&SettingScope::Global));
    assert!(overwork_scopes.contains(&SettingScope::Department("ops".to_string())));

    env.insert_report("emp-ops", Some("ops"), monday(2024, 6, 3), ReportStatus::Submitted, 50.0);
    env.insert_report("emp-eng", Some("eng"), monday(2024, 6, 3), ReportStatus::Submitted, 50.0);
    env.insert_report("emp-late", Some("eng"), monday(2024, 6, 3), ReportStatus::Draft, 0.0);

    let candidates = detect(&env);

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].employee_id, "emp-ops");
    assert_eq!(candidates[0].rule_type, RuleType::Overwork);
    assert_eq!(candidates[0].threshold_value, 45.0);
    assert_eq!(candidates[0].severity, Severity::Medium);
}

#[test]
fn test_invalid_settings_are_rejected() {
    let env = TestEnv::new();
    assert!(matches!(
        env.alerts
            .update_setting(RuleType::Overwork, SettingScope::Global, 0.0, true),
        Err(AlertError::InvalidSetting(_))
    ));
    assert!(matches!(
        env.alerts.update_setting(
            RuleType::Overwork,
            SettingScope::Department(String::new()),
            40.0,
            true
        ),
        Err(AlertError::InvalidSetting(_))
    ));
}
