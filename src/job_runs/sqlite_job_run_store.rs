use super::models::{JobRun, JobRunStatus, RunTrigger};
use super::JobRunStore;
use crate::sqlite_persistence::{
    format_datetime, invalid_value, lock_connection, parse_datetime, SharedConnection,
};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

const INTERRUPTED_MESSAGE: &str = "Job was interrupted (process restart)";

pub struct SqliteJobRunStore {
    conn: SharedConnection,
}

impl SqliteJobRunStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status: String = row.get("status")?;
        let finished_at: Option<String> = row.get("finished_at")?;
        let trigger: String = row.get("triggered_by")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: parse_datetime(&row.get::<_, String>("started_at")?)?,
            finished_at: finished_at.as_deref().map(parse_datetime).transpose()?,
            status: JobRunStatus::parse(&status).ok_or_else(|| invalid_value("status", &status))?,
            error_message: row.get("error_message")?,
            triggered_by: RunTrigger::parse(&trigger)
                .ok_or_else(|| invalid_value("triggered_by", &trigger))?,
        })
    }
}

impl JobRunStore for SqliteJobRunStore {
    fn record_job_start(&self, job_id: &str, trigger: RunTrigger) -> Result<i64> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                format_datetime(&Utc::now()),
                JobRunStatus::Running.as_str(),
                trigger.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![
                format_datetime(&Utc::now()),
                status.as_str(),
                error_message,
                run_id
            ],
        )?;
        Ok(())
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
        )?;

        let runs = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        let conn = lock_connection(&self.conn)?;
        let run = conn
            .query_row(
                "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
                 FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![job_id],
                Self::row_to_job_run,
            )
            .optional()?;
        Ok(run)
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = lock_connection(&self.conn)?;
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                format_datetime(&Utc::now()),
                INTERRUPTED_MESSAGE,
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }
}
