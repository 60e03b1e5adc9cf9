use super::error::AlertError;
use super::models::{
    Alert, AlertHistoryEntry, AlertSetting, AlertStatus, CandidateAlert, NewAlertHistoryEntry,
    ReconcileOutcome, RuleType, SettingScope, UpsertOutcome,
};
use super::{AlertSettingsStore, AlertStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Actor recorded on history entries written by detection.
pub const SYSTEM_ACTOR: &str = "system";

pub struct AlertService {
    alerts: Arc<dyn AlertStore>,
    settings: Arc<dyn AlertSettingsStore>,
}

impl AlertService {
    pub fn new(alerts: Arc<dyn AlertStore>, settings: Arc<dyn AlertSettingsStore>) -> Self {
        Self { alerts, settings }
    }

    /// Applies candidates in order. Each candidate either refreshes the live
    /// alert for its key or creates a new open one; only the latter should be
    /// notified.
    ///
    /// A candidate that fails is recorded in the outcome and the remaining
    /// ones are still applied, so alerts committed by this call are always
    /// returned to the caller.
    pub fn reconcile(&self, candidates: &[CandidateAlert], now: DateTime<Utc>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for candidate in candidates {
            match self.apply(candidate, now) {
                Ok(UpsertOutcome::Created(alert)) => {
                    info!(
                        "Raised {} alert {} for {} week of {} ({})",
                        alert.rule_type,
                        alert.id,
                        alert.employee_id,
                        alert.period_start,
                        alert.severity
                    );
                    outcome.created.push(alert);
                }
                Ok(UpsertOutcome::Updated(alert)) => {
                    debug!(
                        "Refreshed {} alert {} for {} week of {}",
                        alert.rule_type, alert.id, alert.employee_id, alert.period_start
                    );
                    outcome.updated.push(alert);
                }
                Err(e) => {
                    error!(
                        "Failed to store {} alert for {} week of {}: {}",
                        candidate.rule_type, candidate.employee_id, candidate.period_start, e
                    );
                    outcome.failed.push((candidate.clone(), e));
                }
            }
        }

        outcome
    }

    /// Upserts one candidate. When another writer inserted the live alert for
    /// the same key between our read and our insert, that alert is returned as
    /// a refresh: its creator owns the notification.
    fn apply(
        &self,
        candidate: &CandidateAlert,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, AlertError> {
        let err = match self.alerts.upsert_detection(candidate, now) {
            Ok(upserted) => return Ok(upserted),
            Err(e) => AlertError::from_store(e),
        };
        if !matches!(err, AlertError::DuplicateOpenAlert { .. }) {
            return Err(err);
        }

        let live = self.alerts.find_open_alert(
            candidate.rule_type,
            &candidate.employee_id,
            candidate.period_start,
        )?;
        match live {
            Some(alert) => {
                debug!(
                    "{} alert for {} week of {} was raised concurrently as {}",
                    alert.rule_type, alert.employee_id, alert.period_start, alert.id
                );
                Ok(UpsertOutcome::Updated(alert))
            }
            None => Err(err),
        }
    }

    pub fn acknowledge(
        &self,
        id: i64,
        actor: &str,
        note: Option<String>,
    ) -> Result<Alert, AlertError> {
        self.transition(id, AlertStatus::Acknowledged, actor, note)
    }

    pub fn resolve(&self, id: i64, actor: &str, note: Option<String>) -> Result<Alert, AlertError> {
        self.transition(id, AlertStatus::Resolved, actor, note)
    }

    fn transition(
        &self,
        id: i64,
        to: AlertStatus,
        actor: &str,
        note: Option<String>,
    ) -> Result<Alert, AlertError> {
        let alert = self.get_alert(id)?;
        if !alert.status.can_transition_to(to) {
            return Err(AlertError::InvalidTransition {
                id,
                from: alert.status,
                to,
            });
        }

        let entry = NewAlertHistoryEntry {
            alert_id: id,
            from_status: Some(alert.status),
            to_status: to,
            actor: actor.to_string(),
            note,
            recorded_at: Utc::now(),
        };
        let applied = self.alerts.transition_status(alert.status, &entry)?;
        if !applied {
            // Someone else moved it first; report what it is now.
            let current = self.get_alert(id)?;
            return Err(AlertError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }

        info!("Alert {} moved from {} to {} by {}", id, alert.status, to, actor);
        self.get_alert(id)
    }

    pub fn get_alert(&self, id: i64) -> Result<Alert, AlertError> {
        self.alerts.get_alert(id)?.ok_or(AlertError::NotFound(id))
    }

    pub fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>, AlertError> {
        Ok(self.alerts.list_alerts(status)?)
    }

    pub fn history(&self, id: i64) -> Result<Vec<AlertHistoryEntry>, AlertError> {
        self.get_alert(id)?;
        Ok(self.alerts.list_history(id)?)
    }

    pub fn settings_for(&self, rule_type: RuleType) -> Result<Vec<AlertSetting>, AlertError> {
        Ok(self.settings.list_settings(rule_type)?)
    }

    pub fn update_setting(
        &self,
        rule_type: RuleType,
        scope: SettingScope,
        threshold_value: f64,
        enabled: bool,
    ) -> Result<AlertSetting, AlertError> {
        if !threshold_value.is_finite() || threshold_value <= 0.0 {
            return Err(AlertError::InvalidSetting(format!(
                "{} threshold must be a positive number, got {}",
                rule_type, threshold_value
            )));
        }
        if !matches!(scope, SettingScope::Global) && scope.id().is_empty() {
            return Err(AlertError::InvalidSetting(format!(
                "{} scope requires an id",
                scope.kind()
            )));
        }

        let setting = AlertSetting {
            rule_type,
            scope,
            threshold_value,
            enabled,
            updated_at: Utc::now(),
        };
        self.settings.upsert_setting(&setting)?;
        info!(
            "Alert setting {} {}:{} set to {} (enabled: {})",
            rule_type,
            setting.scope.kind(),
            setting.scope.id(),
            threshold_value,
            enabled
        );
        Ok(setting)
    }

    /// Seeds a global setting with the built-in default for every rule that
    /// has none. Returns how many were written.
    pub fn ensure_default_settings(&self) -> Result<usize, AlertError> {
        let mut seeded = 0;
        for rule_type in RuleType::ALL {
            if self
                .settings
                .get_settings(rule_type, &SettingScope::Global)?
                .is_none()
            {
                self.settings.upsert_setting(&AlertSetting {
                    rule_type,
                    scope: SettingScope::Global,
                    threshold_value: rule_type.default_threshold(),
                    enabled: true,
                    updated_at: Utc::now(),
                })?;
                seeded += 1;
            }
        }
        if seeded > 0 {
            info!("Seeded {} default alert settings", seeded);
        }
        Ok(seeded)
    }
}
