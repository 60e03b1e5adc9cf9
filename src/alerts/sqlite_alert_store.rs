use super::error::AlertError;
use super::models::{
    Alert, AlertHistoryEntry, AlertSetting, AlertStatus, CandidateAlert, NewAlertHistoryEntry,
    RuleType, SettingScope, Severity, UpsertOutcome,
};
use super::service::SYSTEM_ACTOR;
use super::{AlertSettingsStore, AlertStore};
use crate::sqlite_persistence::{
    format_date, format_datetime, invalid_value, lock_connection, parse_date, parse_datetime,
    SharedConnection,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

const ALERT_COLUMNS: &str = "id, rule_type, employee_id, period_start, period_end, detected_at, \
     severity, detected_value, threshold_value, status, created_at, updated_at";

/// SQLite-backed alerts, alert history and alert settings.
pub struct SqliteAlertStore {
    conn: SharedConnection,
}

impl SqliteAlertStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<Alert> {
        let rule_type: String = row.get("rule_type")?;
        let severity: String = row.get("severity")?;
        let status: String = row.get("status")?;

        Ok(Alert {
            id: row.get("id")?,
            rule_type: RuleType::parse(&rule_type)
                .ok_or_else(|| invalid_value("rule_type", &rule_type))?,
            employee_id: row.get("employee_id")?,
            period_start: parse_date(&row.get::<_, String>("period_start")?)?,
            period_end: parse_date(&row.get::<_, String>("period_end")?)?,
            detected_at: parse_datetime(&row.get::<_, String>("detected_at")?)?,
            severity: Severity::parse(&severity)
                .ok_or_else(|| invalid_value("severity", &severity))?,
            detected_value: row.get("detected_value")?,
            threshold_value: row.get("threshold_value")?,
            status: AlertStatus::parse(&status).ok_or_else(|| invalid_value("status", &status))?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?)?,
            updated_at: parse_datetime(&row.get::<_, String>("updated_at")?)?,
        })
    }

    fn row_to_history(row: &rusqlite::Row) -> rusqlite::Result<AlertHistoryEntry> {
        let from_status: Option<String> = row.get("from_status")?;
        let to_status: String = row.get("to_status")?;

        Ok(AlertHistoryEntry {
            id: row.get("id")?,
            alert_id: row.get("alert_id")?,
            from_status: from_status
                .map(|s| AlertStatus::parse(&s).ok_or_else(|| invalid_value("from_status", &s)))
                .transpose()?,
            to_status: AlertStatus::parse(&to_status)
                .ok_or_else(|| invalid_value("to_status", &to_status))?,
            actor: row.get("actor")?,
            note: row.get("note")?,
            recorded_at: parse_datetime(&row.get::<_, String>("recorded_at")?)?,
        })
    }

    fn row_to_setting(row: &rusqlite::Row) -> rusqlite::Result<AlertSetting> {
        let rule_type: String = row.get("rule_type")?;
        let scope_kind: String = row.get("scope_kind")?;
        let scope_id: String = row.get("scope_id")?;

        Ok(AlertSetting {
            rule_type: RuleType::parse(&rule_type)
                .ok_or_else(|| invalid_value("rule_type", &rule_type))?,
            scope: SettingScope::from_parts(&scope_kind, &scope_id)
                .ok_or_else(|| invalid_value("scope_kind", &scope_kind))?,
            threshold_value: row.get("threshold_value")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            updated_at: parse_datetime(&row.get::<_, String>("updated_at")?)?,
        })
    }

    fn query_live_alert(
        conn: &Connection,
        rule_type: RuleType,
        employee_id: &str,
        period_start: NaiveDate,
    ) -> rusqlite::Result<Option<Alert>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM alerts
                 WHERE rule_type = ?1 AND employee_id = ?2 AND period_start = ?3
                   AND status IN ('open', 'acknowledged')",
                ALERT_COLUMNS
            ),
            params![rule_type.as_str(), employee_id, format_date(&period_start)],
            Self::row_to_alert,
        )
        .optional()
    }

    fn query_alert(conn: &Connection, id: i64) -> rusqlite::Result<Option<Alert>> {
        conn.query_row(
            &format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS),
            params![id],
            Self::row_to_alert,
        )
        .optional()
    }

    fn insert_history(
        conn: &Connection,
        entry: &NewAlertHistoryEntry,
    ) -> rusqlite::Result<AlertHistoryEntry> {
        conn.execute(
            "INSERT INTO alert_history (alert_id, from_status, to_status, actor, note, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.alert_id,
                entry.from_status.map(|s| s.as_str()),
                entry.to_status.as_str(),
                entry.actor,
                entry.note,
                format_datetime(&entry.recorded_at),
            ],
        )?;
        Ok(AlertHistoryEntry {
            id: conn.last_insert_rowid(),
            alert_id: entry.alert_id,
            from_status: entry.from_status,
            to_status: entry.to_status,
            actor: entry.actor.clone(),
            note: entry.note.clone(),
            recorded_at: entry.recorded_at,
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl AlertStore for SqliteAlertStore {
    fn find_open_alert(
        &self,
        rule_type: RuleType,
        employee_id: &str,
        period_start: NaiveDate,
    ) -> Result<Option<Alert>> {
        let conn = lock_connection(&self.conn)?;
        Ok(Self::query_live_alert(
            &conn,
            rule_type,
            employee_id,
            period_start,
        )?)
    }

    fn upsert_detection(
        &self,
        candidate: &CandidateAlert,
        detected_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut conn = lock_connection(&self.conn)?;
        // IMMEDIATE takes the write lock before the lookup, so another
        // process cannot slip an insert between the read and the write.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = format_datetime(&detected_at);

        let existing = Self::query_live_alert(
            &tx,
            candidate.rule_type,
            &candidate.employee_id,
            candidate.period_start,
        )?;

        let outcome = match existing {
            Some(alert) => {
                tx.execute(
                    "UPDATE alerts
                     SET detected_at = ?1, severity = ?2, detected_value = ?3,
                         threshold_value = ?4, updated_at = ?1
                     WHERE id = ?5",
                    params![
                        now,
                        candidate.severity.as_str(),
                        candidate.detected_value,
                        candidate.threshold_value,
                        alert.id
                    ],
                )?;
                let updated = Self::query_alert(&tx, alert.id)?
                    .with_context(|| format!("Alert {} vanished during update", alert.id))?;
                UpsertOutcome::Updated(updated)
            }
            None => {
                let inserted = tx.execute(
                    "INSERT INTO alerts (rule_type, employee_id, period_start, period_end,
                        detected_at, severity, detected_value, threshold_value, status,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?5, ?5)",
                    params![
                        candidate.rule_type.as_str(),
                        candidate.employee_id,
                        format_date(&candidate.period_start),
                        format_date(&candidate.period_end),
                        now,
                        candidate.severity.as_str(),
                        candidate.detected_value,
                        candidate.threshold_value,
                        AlertStatus::Open.as_str(),
                    ],
                );
                match inserted {
                    Ok(_) => {}
                    Err(e) if is_unique_violation(&e) => {
                        return Err(AlertError::DuplicateOpenAlert {
                            rule_type: candidate.rule_type,
                            employee_id: candidate.employee_id.clone(),
                            period_start: candidate.period_start,
                        }
                        .into());
                    }
                    Err(e) => return Err(e.into()),
                }
                let id = tx.last_insert_rowid();

                Self::insert_history(
                    &tx,
                    &NewAlertHistoryEntry {
                        alert_id: id,
                        from_status: None,
                        to_status: AlertStatus::Open,
                        actor: SYSTEM_ACTOR.to_string(),
                        note: Some(format!(
                            "{} detected: {} (threshold {})",
                            candidate.rule_type, candidate.detected_value, candidate.threshold_value
                        )),
                        recorded_at: detected_at,
                    },
                )?;

                let created = Self::query_alert(&tx, id)?
                    .with_context(|| format!("Alert {} vanished after insert", id))?;
                UpsertOutcome::Created(created)
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn append_history(&self, entry: &NewAlertHistoryEntry) -> Result<AlertHistoryEntry> {
        let conn = lock_connection(&self.conn)?;
        Self::insert_history(&conn, entry)
            .with_context(|| format!("Failed to append history for alert {}", entry.alert_id))
    }

    fn get_alert(&self, id: i64) -> Result<Option<Alert>> {
        let conn = lock_connection(&self.conn)?;
        Ok(Self::query_alert(&conn, id)?)
    }

    fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM alerts WHERE (?1 IS NULL OR status = ?1)
             ORDER BY detected_at DESC, id DESC",
            ALERT_COLUMNS
        ))?;

        let alerts = stmt
            .query_map(params![status.map(|s| s.as_str())], Self::row_to_alert)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(alerts)
    }

    fn transition_status(&self, from: AlertStatus, entry: &NewAlertHistoryEntry) -> Result<bool> {
        let mut conn = lock_connection(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE alerts SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                entry.to_status.as_str(),
                format_datetime(&entry.recorded_at),
                entry.alert_id,
                from.as_str()
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        Self::insert_history(&tx, entry)?;
        tx.commit()?;
        Ok(true)
    }

    fn list_history(&self, alert_id: i64) -> Result<Vec<AlertHistoryEntry>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, alert_id, from_status, to_status, actor, note, recorded_at
             FROM alert_history WHERE alert_id = ?1 ORDER BY id",
        )?;

        let entries = stmt
            .query_map(params![alert_id], Self::row_to_history)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}

impl AlertSettingsStore for SqliteAlertStore {
    fn get_settings(
        &self,
        rule_type: RuleType,
        scope: &SettingScope,
    ) -> Result<Option<AlertSetting>> {
        let conn = lock_connection(&self.conn)?;
        let setting = conn
            .query_row(
                "SELECT rule_type, scope_kind, scope_id, threshold_value, enabled, updated_at
                 FROM alert_settings WHERE rule_type = ?1 AND scope_kind = ?2 AND scope_id = ?3",
                params![rule_type.as_str(), scope.kind(), scope.id()],
                Self::row_to_setting,
            )
            .optional()?;
        Ok(setting)
    }

    fn list_settings(&self, rule_type: RuleType) -> Result<Vec<AlertSetting>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT rule_type, scope_kind, scope_id, threshold_value, enabled, updated_at
             FROM alert_settings WHERE rule_type = ?1 ORDER BY scope_kind, scope_id",
        )?;

        let settings = stmt
            .query_map(params![rule_type.as_str()], Self::row_to_setting)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(settings)
    }

    fn upsert_setting(&self, setting: &AlertSetting) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT INTO alert_settings
                (rule_type, scope_kind, scope_id, threshold_value, enabled, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(rule_type, scope_kind, scope_id)
             DO UPDATE SET threshold_value = excluded.threshold_value,
                           enabled = excluded.enabled,
                           updated_at = excluded.updated_at",
            params![
                setting.rule_type.as_str(),
                setting.scope.kind(),
                setting.scope.id(),
                setting.threshold_value,
                setting.enabled,
                format_datetime(&setting.updated_at),
            ],
        )
        .with_context(|| format!("Failed to save {} setting", setting.rule_type))?;
        Ok(())
    }
}
