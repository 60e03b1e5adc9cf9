use super::ArchiveStore;
use crate::sqlite_persistence::{format_date, format_datetime, lock_connection, SharedConnection};
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params;

pub struct SqliteArchiveStore {
    conn: SharedConnection,
}

impl SqliteArchiveStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl ArchiveStore for SqliteArchiveStore {
    fn find_archivable_reports(&self, cutoff: NaiveDate, limit: Option<usize>) -> Result<Vec<i64>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id FROM weekly_reports WHERE period_end < ?1
             ORDER BY period_end, id LIMIT ?2",
        )?;

        // SQLite treats a negative LIMIT as no limit.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let ids = stmt
            .query_map(params![format_date(&cutoff), limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;

        Ok(ids)
    }

    fn move_batch(&self, report_ids: &[i64], archived_at: DateTime<Utc>) -> Result<usize> {
        let mut conn = lock_connection(&self.conn)?;
        let tx = conn.transaction()?;
        let archived_at = format_datetime(&archived_at);

        let mut moved = 0;
        for id in report_ids {
            let copied = tx.execute(
                "INSERT INTO archived_weekly_reports
                    (id, employee_id, department_id, period_start, period_end, submitted_at,
                     status, work_hours, archived_at)
                 SELECT id, employee_id, department_id, period_start, period_end, submitted_at,
                        status, work_hours, ?2
                 FROM weekly_reports WHERE id = ?1",
                params![id, archived_at],
            )?;
            if copied == 0 {
                bail!("Report {} no longer exists", id);
            }
            tx.execute("DELETE FROM weekly_reports WHERE id = ?1", params![id])?;
            moved += 1;
        }

        tx.commit()?;
        Ok(moved)
    }

    fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = lock_connection(&self.conn)?;
        let purged = conn.execute(
            "DELETE FROM archived_weekly_reports WHERE archived_at < ?1",
            params![format_datetime(&cutoff)],
        )?;
        Ok(purged)
    }

    fn archived_count(&self) -> Result<usize> {
        let conn = lock_connection(&self.conn)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM archived_weekly_reports", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}
