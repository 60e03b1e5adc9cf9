use super::error::AlertError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Detection rules. Declaration order is the tie-break order for candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    UnsubmittedReport,
    Overwork,
    SuddenChange,
}

impl RuleType {
    pub const ALL: [RuleType; 3] = [
        RuleType::UnsubmittedReport,
        RuleType::Overwork,
        RuleType::SuddenChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::UnsubmittedReport => "unsubmitted_report",
            RuleType::Overwork => "overwork",
            RuleType::SuddenChange => "sudden_change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unsubmitted_report" => Some(RuleType::UnsubmittedReport),
            "overwork" => Some(RuleType::Overwork),
            "sudden_change" => Some(RuleType::SuddenChange),
            _ => None,
        }
    }

    /// Threshold used when no setting exists at any scope: grace days for
    /// unsubmitted reports, weekly hours for overwork, hour delta for sudden change.
    pub fn default_threshold(&self) -> f64 {
        match self {
            RuleType::UnsubmittedReport => 3.0,
            RuleType::Overwork => 60.0,
            RuleType::SuddenChange => 20.0,
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(AlertStatus::Open),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "resolved" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }

    /// Resolved is terminal.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (AlertStatus::Open, AlertStatus::Acknowledged)
                | (AlertStatus::Open, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a setting applies to. Narrower scopes win during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SettingScope {
    Global,
    Department(String),
    Employee(String),
}

impl SettingScope {
    pub fn kind(&self) -> &'static str {
        match self {
            SettingScope::Global => "global",
            SettingScope::Department(_) => "department",
            SettingScope::Employee(_) => "employee",
        }
    }

    /// Empty for the global scope.
    pub fn id(&self) -> &str {
        match self {
            SettingScope::Global => "",
            SettingScope::Department(id) | SettingScope::Employee(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: &str) -> Option<Self> {
        match kind {
            "global" => Some(SettingScope::Global),
            "department" => Some(SettingScope::Department(id.to_string())),
            "employee" => Some(SettingScope::Employee(id.to_string())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSetting {
    pub rule_type: RuleType,
    pub scope: SettingScope,
    pub threshold_value: f64,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// A detection result that has not been reconciled against stored alerts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateAlert {
    pub rule_type: RuleType,
    pub employee_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub severity: Severity,
    pub detected_value: f64,
    pub threshold_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub rule_type: RuleType,
    pub employee_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub detected_at: DateTime<Utc>,
    pub severity: Severity,
    pub detected_value: f64,
    pub threshold_value: f64,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of one lifecycle change. `from_status` is `None` on creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub id: i64,
    pub alert_id: i64,
    pub from_status: Option<AlertStatus>,
    pub to_status: AlertStatus,
    pub actor: String,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlertHistoryEntry {
    pub alert_id: i64,
    pub from_status: Option<AlertStatus>,
    pub to_status: AlertStatus,
    pub actor: String,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Result of applying one candidate to the alert table.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(Alert),
    Updated(Alert),
}

/// Result of reconciling one detection run. Candidates that could not be
/// stored are listed in `failed` and do not stop the others.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub created: Vec<Alert>,
    pub updated: Vec<Alert>,
    pub failed: Vec<(CandidateAlert, AlertError)>,
}

impl ReconcileOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
