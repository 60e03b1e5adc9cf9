//! Alert detection rules and the engine that feeds them.
//!
//! Every rule is a pure function of a report (or a pair of consecutive
//! reports), its resolved threshold and the current date. The engine does all
//! reads up front and then evaluates, so two runs over the same data produce
//! the same candidates in the same order.

use super::models::{AlertSetting, CandidateAlert, RuleType, Severity, SettingScope};
use super::AlertSettingsStore;
use crate::reports::{ConsecutivePeriods, ReportStore, ReportWindow, WeeklyReport};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Overwork becomes high severity above this multiple of the threshold.
const OVERWORK_HIGH_RATIO: f64 = 1.2;
const SUDDEN_CHANGE_MEDIUM_RATIO: f64 = 1.5;
const SUDDEN_CHANGE_HIGH_RATIO: f64 = 2.0;
const UNSUBMITTED_MEDIUM_DAYS: f64 = 7.0;
const UNSUBMITTED_HIGH_DAYS: f64 = 14.0;

/// A draft report whose week ended more than `grace_days` before `today`.
/// The detected value is the number of days since the week ended.
pub fn check_unsubmitted(
    report: &WeeklyReport,
    grace_days: f64,
    today: NaiveDate,
) -> Option<CandidateAlert> {
    if report.status.is_submitted() {
        return None;
    }
    let days_since_end = (today - report.period_end).num_days() as f64;
    let overdue = days_since_end - grace_days;
    if overdue <= 0.0 {
        return None;
    }

    let severity = if overdue < UNSUBMITTED_MEDIUM_DAYS {
        Severity::Low
    } else if overdue < UNSUBMITTED_HIGH_DAYS {
        Severity::Medium
    } else {
        Severity::High
    };

    Some(candidate(
        RuleType::UnsubmittedReport,
        report,
        severity,
        days_since_end,
        grace_days,
    ))
}

/// A submitted report with more hours than `threshold`.
pub fn check_overwork(report: &WeeklyReport, threshold: f64) -> Option<CandidateAlert> {
    if !report.status.is_submitted() || report.work_hours <= threshold {
        return None;
    }

    let severity = if report.work_hours > threshold * OVERWORK_HIGH_RATIO {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(candidate(
        RuleType::Overwork,
        report,
        severity,
        report.work_hours,
        threshold,
    ))
}

/// Hours moved by more than `threshold` between two consecutive weeks.
/// Raised against the later week.
pub fn check_sudden_change(pair: &ConsecutivePeriods, threshold: f64) -> Option<CandidateAlert> {
    let delta = (pair.current.work_hours - pair.previous.work_hours).abs();
    if delta <= threshold {
        return None;
    }

    let ratio = delta / threshold;
    let severity = if ratio < SUDDEN_CHANGE_MEDIUM_RATIO {
        Severity::Low
    } else if ratio < SUDDEN_CHANGE_HIGH_RATIO {
        Severity::Medium
    } else {
        Severity::High
    };

    Some(candidate(
        RuleType::SuddenChange,
        &pair.current,
        severity,
        delta,
        threshold,
    ))
}

fn candidate(
    rule_type: RuleType,
    report: &WeeklyReport,
    severity: Severity,
    detected_value: f64,
    threshold_value: f64,
) -> CandidateAlert {
    CandidateAlert {
        rule_type,
        employee_id: report.employee_id.clone(),
        period_start: report.period_start,
        period_end: report.period_end,
        severity,
        detected_value,
        threshold_value,
    }
}

/// Settings read once per run, resolved employee first, then department,
/// then global, then the rule's built-in default.
#[derive(Debug, Default)]
pub struct SettingsSnapshot {
    by_scope: HashMap<(RuleType, SettingScope), AlertSetting>,
}

impl SettingsSnapshot {
    pub fn new(settings: impl IntoIterator<Item = AlertSetting>) -> Self {
        let by_scope = settings
            .into_iter()
            .map(|s| ((s.rule_type, s.scope.clone()), s))
            .collect();
        Self { by_scope }
    }

    /// Threshold in effect for the employee, or `None` when the rule is disabled.
    pub fn threshold_for(
        &self,
        rule_type: RuleType,
        employee_id: &str,
        department_id: Option<&str>,
    ) -> Option<f64> {
        let mut scopes = vec![SettingScope::Employee(employee_id.to_string())];
        if let Some(department_id) = department_id {
            scopes.push(SettingScope::Department(department_id.to_string()));
        }
        scopes.push(SettingScope::Global);

        match scopes
            .into_iter()
            .find_map(|scope| self.by_scope.get(&(rule_type, scope)))
        {
            Some(setting) if setting.enabled => Some(setting.threshold_value),
            Some(_) => None,
            None => Some(rule_type.default_threshold()),
        }
    }
}

/// Evaluates every rule and returns candidates sorted by employee, rule and week.
pub fn evaluate(
    reports: &[WeeklyReport],
    pairs: &[ConsecutivePeriods],
    settings: &SettingsSnapshot,
    today: NaiveDate,
) -> Vec<CandidateAlert> {
    let mut candidates = Vec::new();

    for report in reports {
        let department = report.department_id.as_deref();
        if let Some(grace) =
            settings.threshold_for(RuleType::UnsubmittedReport, &report.employee_id, department)
        {
            candidates.extend(check_unsubmitted(report, grace, today));
        }
        if let Some(threshold) =
            settings.threshold_for(RuleType::Overwork, &report.employee_id, department)
        {
            candidates.extend(check_overwork(report, threshold));
        }
    }

    for pair in pairs {
        if let Some(threshold) = settings.threshold_for(
            RuleType::SuddenChange,
            &pair.current.employee_id,
            pair.current.department_id.as_deref(),
        ) {
            candidates.extend(check_sudden_change(pair, threshold));
        }
    }

    candidates.sort_by(|a, b| {
        a.employee_id
            .cmp(&b.employee_id)
            .then(a.rule_type.cmp(&b.rule_type))
            .then(a.period_start.cmp(&b.period_start))
    });
    candidates
}

pub struct AlertDetectionEngine {
    reports: Arc<dyn ReportStore>,
    settings: Arc<dyn AlertSettingsStore>,
}

impl AlertDetectionEngine {
    pub fn new(reports: Arc<dyn ReportStore>, settings: Arc<dyn AlertSettingsStore>) -> Self {
        Self { reports, settings }
    }

    /// Reads settings and reports for `window`, then evaluates the rules.
    /// Sudden-change pairs are fetched for every employee seen in the window
    /// and kept only when the later week still overlaps it.
    pub fn detect(&self, window: ReportWindow, today: NaiveDate) -> Result<Vec<CandidateAlert>> {
        let mut settings = Vec::new();
        for rule_type in RuleType::ALL {
            settings.extend(
                self.settings
                    .list_settings(rule_type)
                    .with_context(|| format!("Failed to load {} settings", rule_type))?,
            );
        }
        let snapshot = SettingsSnapshot::new(settings);

        let reports = self
            .reports
            .fetch_reports_for_period(window.start, window.end)
            .context("Failed to fetch reports for detection window")?;

        let employees: BTreeSet<&str> = reports.iter().map(|r| r.employee_id.as_str()).collect();

        let mut pairs = Vec::new();
        for employee_id in employees {
            let pair = self
                .reports
                .fetch_consecutive_periods(employee_id)
                .with_context(|| format!("Failed to fetch consecutive weeks for {}", employee_id))?;
            if let Some(pair) = pair.filter(|p| p.current.period_end >= window.start) {
                pairs.push(pair);
            }
        }

        debug!(
            "Evaluating {} reports and {} consecutive pairs from {} to {}",
            reports.len(),
            pairs.len(),
            window.start,
            window.end
        );

        Ok(evaluate(&reports, &pairs, &snapshot, today))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MockAlertSettingsStore;
    use crate::reports::{MockReportStore, ReportStatus};
    use chrono::{Duration, Utc};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 20).unwrap()
    }

    fn report(
        employee: &str,
        period_end: NaiveDate,
        status: ReportStatus,
        hours: f64,
    ) -> WeeklyReport {
        WeeklyReport {
            id: 1,
            employee_id: employee.to_string(),
            department_id: None,
            period_start: period_end - Duration::days(6),
            period_end,
            submitted_at: None,
            status,
            work_hours: hours,
        }
    }

    fn setting(
        rule_type: RuleType,
        scope: SettingScope,
        threshold: f64,
        enabled: bool,
    ) -> AlertSetting {
        AlertSetting {
            rule_type,
            scope,
            threshold_value: threshold,
            enabled,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_unsubmitted_ten_days_past_end_with_five_day_grace() {
        let draft = report("alice", today() - Duration::days(10), ReportStatus::Draft, 0.0);

        let candidate = check_unsubmitted(&draft, 5.0, today()).unwrap();
        assert_eq!(candidate.rule_type, RuleType::UnsubmittedReport);
        assert_eq!(candidate.severity, Severity::Low);
        assert_eq!(candidate.detected_value, 10.0);
        assert_eq!(candidate.threshold_value, 5.0);
    }

    #[test]
    fn test_unsubmitted_respects_grace_and_status() {
        let within_grace = report("alice", today() - Duration::days(5), ReportStatus::Draft, 0.0);
        assert!(check_unsubmitted(&within_grace, 5.0, today()).is_none());

        let submitted = report(
            "alice",
            today() - Duration::days(30),
            ReportStatus::Submitted,
            40.0,
        );
        assert!(check_unsubmitted(&submitted, 5.0, today()).is_none());
    }

    #[test]
    fn test_unsubmitted_severity_grows_with_days_overdue() {
        let medium = report("a", today() - Duration::days(13), ReportStatus::Draft, 0.0);
        let high = report("a", today() - Duration::days(20), ReportStatus::Draft, 0.0);
        assert_eq!(
            check_unsubmitted(&medium, 3.0, today()).unwrap().severity,
            Severity::Medium
        );
        assert_eq!(
            check_unsubmitted(&high, 3.0, today()).unwrap().severity,
            Severity::High
        );
    }

    #[test]
    fn test_overwork_severity() {
        let end = today() - Duration::days(3);
        assert!(check_overwork(&report("a", end, ReportStatus::Submitted, 60.0), 60.0).is_none());
        assert_eq!(
            check_overwork(&report("a", end, ReportStatus::Submitted, 65.0), 60.0)
                .unwrap()
                .severity,
            Severity::Medium
        );
        assert_eq!(
            check_overwork(&report("a", end, ReportStatus::Approved, 80.0), 60.0)
                .unwrap()
                .severity,
            Severity::High
        );
        assert!(check_overwork(&report("a", end, ReportStatus::Draft, 90.0), 60.0).is_none());
    }

    #[test]
    fn test_sudden_change_sixty_vs_thirty_with_threshold_twenty() {
        let end = today() - Duration::days(3);
        let pair = ConsecutivePeriods {
            current: report("alice", end, ReportStatus::Submitted, 60.0),
            previous: report("alice", end - Duration::weeks(1), ReportStatus::Submitted, 30.0),
        };

        let candidate = check_sudden_change(&pair, 20.0).unwrap();
        assert_eq!(candidate.detected_value, 30.0);
        assert_eq!(candidate.severity, Severity::Medium);
        assert_eq!(candidate.period_end, end);
    }

    #[test]
    fn test_sudden_change_severity_bands() {
        let end = today();
        let pair = |current: f64, previous: f64| ConsecutivePeriods {
            current: report("a", end, ReportStatus::Submitted, current),
            previous: report("a", end - Duration::weeks(1), ReportStatus::Submitted, previous),
        };
        assert!(check_sudden_change(&pair(40.0, 25.0), 20.0).is_none());
        assert_eq!(
            check_sudden_change(&pair(20.0, 45.0), 20.0).unwrap().severity,
            Severity::Low
        );
        assert_eq!(
            check_sudden_change(&pair(80.0, 30.0), 20.0).unwrap().severity,
            Severity::High
        );
    }

    #[test]
    fn test_settings_resolution_order() {
        let snapshot = SettingsSnapshot::new(vec![
            setting(RuleType::Overwork, SettingScope::Global, 50.0, true),
            setting(RuleType::Overwork, SettingScope::Department("eng".into()), 55.0, true),
            setting(RuleType::Overwork, SettingScope::Employee("bob".into()), 70.0, true),
            setting(RuleType::SuddenChange, SettingScope::Employee("bob".into()), 10.0, false),
        ]);

        assert_eq!(snapshot.threshold_for(RuleType::Overwork, "bob", Some("eng")), Some(70.0));
        assert_eq!(snapshot.threshold_for(RuleType::Overwork, "amy", Some("eng")), Some(55.0));
        assert_eq!(snapshot.threshold_for(RuleType::Overwork, "amy", None), Some(50.0));
        assert_eq!(snapshot.threshold_for(RuleType::SuddenChange, "bob", None), None);
        assert_eq!(
            snapshot.threshold_for(RuleType::UnsubmittedReport, "amy", None),
            Some(3.0)
        );
    }

    #[test]
    fn test_evaluate_orders_by_employee_rule_and_period() {
        let old = today() - Duration::days(21);
        let recent = today() - Duration::days(14);
        let reports = vec![
            report("zoe", recent, ReportStatus::Submitted, 70.0),
            report("adam", recent, ReportStatus::Submitted, 70.0),
            report("adam", recent - Duration::weeks(1), ReportStatus::Draft, 0.0),
            report("adam", old - Duration::weeks(1), ReportStatus::Draft, 0.0),
        ];

        let first = evaluate(&reports, &[], &SettingsSnapshot::default(), today());
        let second = evaluate(&reports, &[], &SettingsSnapshot::default(), today());
        assert_eq!(first, second);

        let keys: Vec<_> = first
            .iter()
            .map(|c| (c.employee_id.as_str(), c.rule_type, c.period_start))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.first().map(|k| k.0), Some("adam"));
        assert_eq!(keys.last().map(|k| k.0), Some("zoe"));
    }

    #[test]
    fn test_engine_reads_then_evaluates() {
        let window = ReportWindow::lookback(today(), 4);
        let end = today() - Duration::days(3);
        let current = report("alice", end, ReportStatus::Submitted, 60.0);
        let previous = report("alice", end - Duration::weeks(1), ReportStatus::Submitted, 30.0);

        let mut reports = MockReportStore::new();
        let window_reports = vec![previous.clone(), current.clone()];
        reports
            .expect_fetch_reports_for_period()
            .times(1)
            .returning(move |_, _| Ok(window_reports.clone()));
        reports
            .expect_fetch_consecutive_periods()
            .withf(|employee| employee == "alice")
            .times(1)
            .returning(move |_| {
                Ok(Some(ConsecutivePeriods {
                    current: current.clone(),
                    previous: previous.clone(),
                }))
            });

        let mut settings = MockAlertSettingsStore::new();
        settings.expect_list_settings().returning(|_| Ok(vec![]));

        let engine = AlertDetectionEngine::new(Arc::new(reports), Arc::new(settings));
        let candidates = engine.detect(window, today()).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rule_type, RuleType::SuddenChange);
        assert_eq!(candidates[0].detected_value, 30.0);
    }

    #[test]
    fn test_engine_propagates_store_errors() {
        let mut reports = MockReportStore::new();
        reports
            .expect_fetch_reports_for_period()
            .returning(|_, _| Err(anyhow::anyhow!("database is locked")));
        let mut settings = MockAlertSettingsStore::new();
        settings.expect_list_settings().returning(|_| Ok(vec![]));

        let engine = AlertDetectionEngine::new(Arc::new(reports), Arc::new(settings));
        let err = engine
            .detect(ReportWindow::lookback(today(), 4), today())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("database is locked"));
    }
}
