//! Background job scheduling and execution.
//!
//! Jobs run on independent cadences (fixed interval or cron), at most one
//! execution per job at a time, with bounded shutdown.

mod cadence;
mod context;
mod job;
pub mod jobs;
mod scheduler;
mod status;

pub use context::JobContext;
pub use job::{BackgroundJob, JobError, JobSchedule};
pub use scheduler::{
    JobScheduler, SchedulerError, StartError, DEFAULT_SHUTDOWN_GRACE, DEFAULT_SHUTDOWN_NOTICE,
};
pub use status::{JobInfo, JobScheduleInfo, ShutdownReport};
