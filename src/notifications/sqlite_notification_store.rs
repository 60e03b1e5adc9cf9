use super::models::{DeliveryStatus, NotificationRecord};
use super::NotificationStore;
use crate::sqlite_persistence::{
    format_datetime, invalid_value, lock_connection, parse_datetime, SharedConnection,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

pub struct SqliteNotificationStore {
    conn: SharedConnection,
}

impl SqliteNotificationStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<NotificationRecord> {
        let status: String = row.get("delivery_status")?;
        Ok(NotificationRecord {
            id: row.get("id")?,
            alert_id: row.get("alert_id")?,
            channel: row.get("channel")?,
            sent_at: parse_datetime(&row.get::<_, String>("sent_at")?)?,
            delivery_status: DeliveryStatus::parse(&status)
                .ok_or_else(|| invalid_value("delivery_status", &status))?,
            error: row.get("error")?,
        })
    }
}

impl NotificationStore for SqliteNotificationStore {
    fn record_notification(
        &self,
        alert_id: i64,
        channel: &str,
        sent_at: DateTime<Utc>,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<NotificationRecord> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT INTO notification_records (alert_id, channel, sent_at, delivery_status, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                alert_id,
                channel,
                format_datetime(&sent_at),
                status.as_str(),
                error
            ],
        )
        .with_context(|| format!("Failed to record notification for alert {}", alert_id))?;

        Ok(NotificationRecord {
            id: conn.last_insert_rowid(),
            alert_id,
            channel: channel.to_string(),
            sent_at,
            delivery_status: status,
            error,
        })
    }

    fn list_notifications_for_alert(&self, alert_id: i64) -> Result<Vec<NotificationRecord>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, alert_id, channel, sent_at, delivery_status, error
             FROM notification_records WHERE alert_id = ?1 ORDER BY id",
        )?;

        let records = stmt
            .query_map(params![alert_id], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn delete_notifications_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = lock_connection(&self.conn)?;
        let deleted = conn
            .execute(
                "DELETE FROM notification_records WHERE sent_at < ?1",
                params![format_datetime(&cutoff)],
            )
            .context("Failed to delete old notification records")?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{
        AlertStore, CandidateAlert, RuleType, Severity, SqliteAlertStore, UpsertOutcome,
    };
    use crate::sqlite_persistence::open_in_memory;
    use chrono::{Duration, NaiveDate};

    fn create_alert(alerts: &SqliteAlertStore) -> i64 {
        let UpsertOutcome::Created(alert) = alerts
            .upsert_detection(
                &CandidateAlert {
                    rule_type: RuleType::UnsubmittedReport,
                    employee_id: "bob".to_string(),
                    period_start: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
                    period_end: NaiveDate::from_ymd_opt(2024, 6, 9).unwrap(),
                    severity: Severity::Low,
                    detected_value: 10.0,
                    threshold_value: 5.0,
                },
                Utc::now(),
            )
            .unwrap()
        else {
            panic!("expected a new alert");
        };
        alert.id
    }

    #[test]
    fn test_records_both_outcomes_for_an_alert() {
        let conn = open_in_memory().unwrap();
        let alerts = SqliteAlertStore::new(conn.clone());
        let store = SqliteNotificationStore::new(conn);
        let alert_id = create_alert(&alerts);

        store
            .record_notification(
                alert_id,
                "webhook",
                Utc::now(),
                DeliveryStatus::Failed,
                Some("timeout".to_string()),
            )
            .unwrap();
        store
            .record_notification(alert_id, "webhook", Utc::now(), DeliveryStatus::Delivered, None)
            .unwrap();

        let records = store.list_notifications_for_alert(alert_id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].delivery_status, DeliveryStatus::Failed);
        assert_eq!(records[0].error.as_deref(), Some("timeout"));
        assert_eq!(records[1].delivery_status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_delete_before_cutoff_keeps_recent_records() {
        let conn = open_in_memory().unwrap();
        let alerts = SqliteAlertStore::new(conn.clone());
        let store = SqliteNotificationStore::new(conn);
        let alert_id = create_alert(&alerts);
        let now = Utc::now();

        store
            .record_notification(
                alert_id,
                "log",
                now - Duration::days(45),
                DeliveryStatus::Delivered,
                None,
            )
            .unwrap();
        let recent = store
            .record_notification(
                alert_id,
                "log",
                now - Duration::days(2),
                DeliveryStatus::Delivered,
                None,
            )
            .unwrap();

        assert_eq!(
            store
                .delete_notifications_before(now - Duration::days(30))
                .unwrap(),
            1
        );
        let remaining: Vec<i64> = store
            .list_notifications_for_alert(alert_id)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(remaining, vec![recent.id]);
    }

    #[test]
    fn test_unknown_alert_is_rejected() {
        let store = SqliteNotificationStore::new(open_in_memory().unwrap());
        assert!(store
            .record_notification(999, "log", Utc::now(), DeliveryStatus::Delivered, None)
            .is_err());
    }
}
