use super::models::{AlertStatus, RuleType};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert {0} not found")]
    NotFound(i64),

    #[error("Alert {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: AlertStatus,
        to: AlertStatus,
    },

    #[error("A live {rule_type} alert already exists for {employee_id} week of {period_start}")]
    DuplicateOpenAlert {
        rule_type: RuleType,
        employee_id: String,
        period_start: NaiveDate,
    },

    #[error("Invalid alert setting: {0}")]
    InvalidSetting(String),

    #[error("Alert store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl AlertError {
    /// Recovers a typed error raised inside a store call, wrapping anything else.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<AlertError>() {
            Ok(alert_error) => alert_error,
            Err(other) => AlertError::Store(other),
        }
    }
}
