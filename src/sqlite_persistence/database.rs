use super::schema::TIMESHEET_VERSIONED_SCHEMAS;
use super::versioned_schema::{VersionedSchema, BASE_DB_VERSION};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Connection handle shared by every SQLite-backed store.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub fn lock_connection(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| anyhow!("Database connection mutex poisoned"))
}

/// Opens the timesheet database at `db_path`, creating it with the latest
/// schema when missing, or validating and migrating an existing one.
pub fn open_database<P: AsRef<Path>>(db_path: P) -> Result<SharedConnection> {
    let path = db_path.as_ref();
    let is_new_db = !path.exists();

    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to open timesheet database at {:?}", path))?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;
    conn.busy_timeout(Duration::from_secs(5))?;

    let latest = latest_schema()?;
    if is_new_db {
        info!("Creating new timesheet database at {:?}", path);
        latest.create(&conn)?;
    } else {
        let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        let db_version = raw_version - BASE_DB_VERSION as i64;
        if db_version < 1 {
            bail!(
                "Timesheet database version {} is invalid (expected >= 1)",
                db_version
            );
        }

        let schema = TIMESHEET_VERSIONED_SCHEMAS
            .iter()
            .find(|s| s.version == db_version as usize)
            .with_context(|| format!("Unknown timesheet database version {}", db_version))?;
        schema.validate(&conn).with_context(|| {
            format!(
                "Timesheet database schema validation failed for version {}",
                db_version
            )
        })?;

        if (db_version as usize) < latest.version {
            info!(
                "Migrating timesheet database from version {} to {}",
                db_version, latest.version
            );
            migrate(&mut conn, db_version as usize)?;
        }
    }

    Ok(Arc::new(Mutex::new(conn)))
}

/// Fresh database held in memory, used by tests and dry runs.
pub fn open_in_memory() -> Result<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;
    latest_schema()?.create(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Fixed-width UTC timestamps, so text ordering matches time ordering.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| conversion_error(Box::new(e)))
}

pub fn parse_datetime(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(Box::new(e)))
}

/// Error for a stored enum value that no longer parses.
pub fn invalid_value(column: &str, value: &str) -> rusqlite::Error {
    conversion_error(format!("invalid {} value '{}'", column, value).into())
}

fn conversion_error(err: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, err)
}

fn latest_schema() -> Result<&'static VersionedSchema> {
    TIMESHEET_VERSIONED_SCHEMAS
        .last()
        .ok_or_else(|| anyhow!("No timesheet schema versions defined"))
}

fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
    let tx = conn.transaction()?;
    let mut current = from_version;
    for schema in TIMESHEET_VERSIONED_SCHEMAS
        .iter()
        .filter(|s| s.version > from_version)
    {
        info!(
            "Running timesheet database migration from version {} to {}",
            current, schema.version
        );
        if let Some(migration_fn) = schema.migration {
            migration_fn(&tx).with_context(|| {
                format!("Failed to run migration to version {}", schema.version)
            })?;
        }
        current = schema.version;
    }
    tx.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + current),
        [],
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user_version(conn: &Connection) -> usize {
        let raw: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        raw as usize - BASE_DB_VERSION
    }

    #[test]
    fn test_creates_new_database_at_latest_version() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("timesheet.db");

        let conn = open_database(&db_path).unwrap();
        let conn = conn.lock().unwrap();
        assert_eq!(
            user_version(&conn),
            TIMESHEET_VERSIONED_SCHEMAS.last().unwrap().version
        );
    }

    #[test]
    fn test_reopens_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("timesheet.db");

        drop(open_database(&db_path).unwrap());
        let reopened = open_database(&db_path);
        assert!(reopened.is_ok());
    }

    #[test]
    fn test_migrates_v1_database_to_latest() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("timesheet.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            TIMESHEET_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        }

        let conn = open_database(&db_path).unwrap();
        let conn = conn.lock().unwrap();
        assert_eq!(
            user_version(&conn),
            TIMESHEET_VERSIONED_SCHEMAS.last().unwrap().version
        );
        TIMESHEET_VERSIONED_SCHEMAS
            .last()
            .unwrap()
            .validate(&conn)
            .unwrap();
    }

    #[test]
    fn test_rejects_foreign_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("other.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE something (id INTEGER)", [])
                .unwrap();
        }

        let err = open_database(&db_path).unwrap_err().to_string();
        assert!(err.contains("invalid"));
    }
}
