use super::job::JobSchedule;
use serde::Serialize;

/// Snapshot of a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run_at: Option<String>,
    pub runs: u64,
    pub failures: u64,
    pub skipped_ticks: u64,
}

/// Serializable schedule information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        match schedule {
            JobSchedule::Cron(expr) => JobScheduleInfo {
                schedule_type: "cron".to_string(),
                cron: Some(expr),
                value_secs: None,
            },
            JobSchedule::Interval(duration) => JobScheduleInfo {
                schedule_type: "interval".to_string(),
                value_secs: Some(duration.as_secs()),
                cron: None,
            },
        }
    }
}

/// Outcome of [`JobScheduler::stop`](super::JobScheduler::stop).
///
/// Returning from `stop` only means the stop was requested and waited on;
/// `completed` tells whether every execution actually finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: bool,
    /// Jobs still running when the grace period ran out.
    pub abandoned: Vec<String>,
    pub elapsed: std::time::Duration,
}
