//! SQLite schema definitions for the timesheet database.
//!
//! Version 1 holds weekly reports, their archive, alert settings, alerts with
//! their history, and notification records. Version 2 adds job run history.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, Index, Reference, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Reports, alerts, notifications
// =============================================================================

const ALERT_ID_REFERENCE: Reference = Reference {
    table: "alerts",
    column: "id",
};

const WEEKLY_REPORTS_TABLE_V1: Table = Table {
    name: "weekly_reports",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("employee_id", &SqlType::Text, non_null = true),
        sqlite_column!("department_id", &SqlType::Text),
        sqlite_column!("period_start", &SqlType::Text, non_null = true),
        sqlite_column!("period_end", &SqlType::Text, non_null = true),
        sqlite_column!("submitted_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("work_hours", &SqlType::Real, non_null = true),
    ],
    indices: &[
        Index {
            name: "idx_weekly_reports_employee_period",
            columns: "employee_id, period_start",
            unique: true,
            predicate: None,
        },
        Index {
            name: "idx_weekly_reports_period_end",
            columns: "period_end",
            unique: false,
            predicate: None,
        },
    ],
};

/// Same shape as `weekly_reports`, keeping the original row id.
const ARCHIVED_WEEKLY_REPORTS_TABLE_V1: Table = Table {
    name: "archived_weekly_reports",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("employee_id", &SqlType::Text, non_null = true),
        sqlite_column!("department_id", &SqlType::Text),
        sqlite_column!("period_start", &SqlType::Text, non_null = true),
        sqlite_column!("period_end", &SqlType::Text, non_null = true),
        sqlite_column!("submitted_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("work_hours", &SqlType::Real, non_null = true),
        sqlite_column!("archived_at", &SqlType::Text, non_null = true),
    ],
    indices: &[Index {
        name: "idx_archived_weekly_reports_employee",
        columns: "employee_id, period_start",
        unique: false,
        predicate: None,
    }],
};

/// `scope_id` is the empty string for global settings so the unique index
/// also covers them (NULLs never collide in SQLite unique indices).
const ALERT_SETTINGS_TABLE_V1: Table = Table {
    name: "alert_settings",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("rule_type", &SqlType::Text, non_null = true),
        sqlite_column!("scope_kind", &SqlType::Text, non_null = true),
        sqlite_column!(
            "scope_id",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("threshold_value", &SqlType::Real, non_null = true),
        sqlite_column!(
            "enabled",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[Index {
        name: "idx_alert_settings_rule_scope",
        columns: "rule_type, scope_kind, scope_id",
        unique: true,
        predicate: None,
    }],
};

const ALERTS_TABLE_V1: Table = Table {
    name: "alerts",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("rule_type", &SqlType::Text, non_null = true),
        sqlite_column!("employee_id", &SqlType::Text, non_null = true),
        sqlite_column!("period_start", &SqlType::Text, non_null = true),
        sqlite_column!("period_end", &SqlType::Text, non_null = true),
        sqlite_column!("detected_at", &SqlType::Text, non_null = true),
        sqlite_column!("severity", &SqlType::Text, non_null = true),
        sqlite_column!("detected_value", &SqlType::Real, non_null = true),
        sqlite_column!("threshold_value", &SqlType::Real, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        // At most one live alert per dedup key.
        Index {
            name: "idx_alerts_live_dedup_key",
            columns: "rule_type, employee_id, period_start",
            unique: true,
            predicate: Some("status IN ('open', 'acknowledged')"),
        },
        Index {
            name: "idx_alerts_status",
            columns: "status",
            unique: false,
            predicate: None,
        },
    ],
};

const ALERT_HISTORY_TABLE_V1: Table = Table {
    name: "alert_history",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "alert_id",
            &SqlType::Integer,
            non_null = true,
            references = Some(&ALERT_ID_REFERENCE)
        ),
        sqlite_column!("from_status", &SqlType::Text),
        sqlite_column!("to_status", &SqlType::Text, non_null = true),
        sqlite_column!("actor", &SqlType::Text, non_null = true),
        sqlite_column!("note", &SqlType::Text),
        sqlite_column!("recorded_at", &SqlType::Text, non_null = true),
    ],
    indices: &[Index {
        name: "idx_alert_history_alert_id",
        columns: "alert_id",
        unique: false,
        predicate: None,
    }],
};

const NOTIFICATION_RECORDS_TABLE_V1: Table = Table {
    name: "notification_records",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "alert_id",
            &SqlType::Integer,
            non_null = true,
            references = Some(&ALERT_ID_REFERENCE)
        ),
        sqlite_column!("channel", &SqlType::Text, non_null = true),
        sqlite_column!("sent_at", &SqlType::Text, non_null = true),
        sqlite_column!("delivery_status", &SqlType::Text, non_null = true),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[Index {
        name: "idx_notification_records_alert_id",
        columns: "alert_id",
        unique: false,
        predicate: None,
    }],
};

// =============================================================================
// Version 2 - Job run history
// =============================================================================

const JOB_RUNS_TABLE_V2: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[
        Index {
            name: "idx_job_runs_job_id_started",
            columns: "job_id, started_at DESC",
            unique: false,
            predicate: None,
        },
        Index {
            name: "idx_job_runs_status",
            columns: "status",
            unique: false,
            predicate: None,
        },
    ],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    JOB_RUNS_TABLE_V2.create(conn)
}

pub const TIMESHEET_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            WEEKLY_REPORTS_TABLE_V1,
            ARCHIVED_WEEKLY_REPORTS_TABLE_V1,
            ALERT_SETTINGS_TABLE_V1,
            ALERTS_TABLE_V1,
            ALERT_HISTORY_TABLE_V1,
            NOTIFICATION_RECORDS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            WEEKLY_REPORTS_TABLE_V1,
            ARCHIVED_WEEKLY_REPORTS_TABLE_V1,
            ALERT_SETTINGS_TABLE_V1,
            ALERTS_TABLE_V1,
            ALERT_HISTORY_TABLE_V1,
            NOTIFICATION_RECORDS_TABLE_V1,
            JOB_RUNS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
