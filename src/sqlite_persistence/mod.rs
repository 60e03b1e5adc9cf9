mod database;
mod schema;
mod versioned_schema;

pub use database::{
    format_date, format_datetime, invalid_value, lock_connection, open_database, open_in_memory,
    parse_date, parse_datetime, SharedConnection,
};
pub use schema::TIMESHEET_VERSIONED_SCHEMAS;
pub use versioned_schema::{
    Column, Index, Reference, SqlType, Table, VersionedSchema, BASE_DB_VERSION,
};
