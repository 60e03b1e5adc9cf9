use super::cadence::Cadence;
use super::context::JobContext;
use super::job::{BackgroundJob, JobError};
use super::status::{JobInfo, ShutdownReport};
use crate::job_runs::{JobRunStatus, JobRunStore, RunTrigger};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Total time `stop()` waits for in-flight executions.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Wait after which still running jobs are logged during `stop()`.
pub const DEFAULT_SHUTDOWN_NOTICE: Duration = Duration::from_secs(2);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Job '{0}' is already registered")]
    DuplicateJob(String),
    #[error("Jobs cannot be registered after the scheduler has started")]
    AlreadyStarted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("Job '{job_id}' has an invalid cadence: {reason}")]
    InvalidCadence { job_id: String, reason: String },
    #[error("Job '{job_id}' is misconfigured: {reason}")]
    InvalidConfiguration { job_id: String, reason: String },
    #[error("Scheduler has already been started")]
    AlreadyStarted,
    #[error("Scheduler has been stopped")]
    Stopped,
    #[error("Scheduler must be started from within a tokio runtime")]
    NoRuntime,
}

/// Mutable per-job state shared between the job loop and status queries.
#[derive(Default)]
struct JobState {
    running: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
    skipped_ticks: AtomicU64,
    last_run_at: RwLock<Option<DateTime<Utc>>>,
}

impl JobState {
    fn set_last_run_at(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_run_at.write() {
            *last = Some(at);
        }
    }

    fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at.read().ok().and_then(|last| *last)
    }
}

/// Holds a job's `running` flag for the lifetime of one execution.
struct RunningGuard {
    state: Arc<JobState>,
}

impl RunningGuard {
    fn acquire(state: &Arc<JobState>) -> Option<Self> {
        state
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard {
                state: Arc::clone(state),
            })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
    }
}

struct RegisteredJob {
    job: Arc<dyn BackgroundJob>,
    state: Arc<JobState>,
}

/// Runs every registered job on its own cadence.
///
/// Each job gets one loop task. A tick that arrives while the previous
/// execution of the same job is still in flight is skipped, never queued.
/// Executions run on the blocking pool so a slow job never stalls the loops.
pub struct JobScheduler {
    /// Registration order is kept for startup and status listings.
    jobs: Vec<RegisteredJob>,

    /// Optional persistent history of executions.
    run_history: Option<Arc<dyn JobRunStore>>,

    shutdown_token: CancellationToken,

    /// Tracks job loops and in-flight executions.
    tracker: TaskTracker,

    started: bool,
    shutdown_grace: Duration,
    shutdown_notice: Duration,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            run_history: None,
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            shutdown_notice: DEFAULT_SHUTDOWN_NOTICE,
        }
    }

    pub fn with_run_history(mut self, run_history: Arc<dyn JobRunStore>) -> Self {
        self.run_history = Some(run_history);
        self
    }

    /// Overrides the shutdown grace period and notice wait. The notice is
    /// capped at the grace period.
    pub fn with_shutdown_timeouts(mut self, grace: Duration, notice: Duration) -> Self {
        self.shutdown_grace = grace;
        self.shutdown_notice = notice.min(grace);
        self
    }

    /// Register a job with the scheduler.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) -> Result<(), SchedulerError> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        if self.jobs.iter().any(|entry| entry.job.id() == job.id()) {
            return Err(SchedulerError::DuplicateJob(job.id().to_string()));
        }
        info!("Registering job: {} - {}", job.id(), job.description());
        self.jobs.push(RegisteredJob {
            job,
            state: Arc::new(JobState::default()),
        });
        Ok(())
    }

    /// Get the number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Validates every job, then spawns one loop per job and returns.
    ///
    /// Nothing is spawned if any job fails validation.
    pub fn start(&mut self) -> Result<(), StartError> {
        if self.started {
            return Err(StartError::AlreadyStarted);
        }
        if self.shutdown_token.is_cancelled() {
            return Err(StartError::Stopped);
        }
        let handle = Handle::try_current().map_err(|_| StartError::NoRuntime)?;

        let mut cadences = Vec::with_capacity(self.jobs.len());
        for entry in &self.jobs {
            let job_id = entry.job.id();
            let cadence = Cadence::parse(&entry.job.schedule()).map_err(|reason| {
                StartError::InvalidCadence {
                    job_id: job_id.to_string(),
                    reason,
                }
            })?;
            entry
                .job
                .validate()
                .map_err(|reason| StartError::InvalidConfiguration {
                    job_id: job_id.to_string(),
                    reason,
                })?;
            cadences.push(cadence);
        }

        if let Some(run_history) = &self.run_history {
            match run_history.mark_stale_jobs_failed() {
                Ok(count) if count > 0 => {
                    info!("Marked {} stale jobs as failed from previous run", count);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to mark stale jobs: {}", e);
                }
            }
            for entry in &self.jobs {
                log_last_run(run_history.as_ref(), entry.job.id());
            }
        }

        info!("Starting job scheduler with {} registered jobs", self.jobs.len());
        for (entry, cadence) in self.jobs.iter().zip(cadences) {
            let job_loop = JobLoop {
                job: Arc::clone(&entry.job),
                state: Arc::clone(&entry.state),
                cadence,
                shutdown_token: self.shutdown_token.clone(),
                tracker: self.tracker.clone(),
                handle: handle.clone(),
                run_history: self.run_history.clone(),
            };
            self.tracker.spawn_on(job_loop.run(), &handle);
        }
        self.started = true;
        Ok(())
    }

    /// Whether `stop()` has been called. Says nothing about whether the
    /// running executions have finished; see [`ShutdownReport::completed`].
    pub fn stop_requested(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Cancels every loop and waits for in-flight executions.
    ///
    /// Jobs still running after the notice wait are logged. Jobs still
    /// running after the grace period are abandoned and reported.
    pub async fn stop(&self) -> ShutdownReport {
        let started = Instant::now();
        info!("Shutting down scheduler...");
        self.shutdown_token.cancel();
        self.tracker.close();

        let wait = self.tracker.wait();
        tokio::pin!(wait);

        if tokio::time::timeout(self.shutdown_notice, &mut wait)
            .await
            .is_err()
        {
            info!(
                "Waiting for running jobs to finish: {}",
                self.running_job_ids().join(", ")
            );
            let remaining = self.shutdown_grace.saturating_sub(started.elapsed());
            if tokio::time::timeout(remaining, &mut wait).await.is_err() {
                let abandoned = self.running_job_ids();
                warn!(
                    "Shutdown grace period of {:?} elapsed, abandoning jobs: {}",
                    self.shutdown_grace,
                    abandoned.join(", ")
                );
                return ShutdownReport {
                    completed: false,
                    abandoned,
                    elapsed: started.elapsed(),
                };
            }
        }

        let elapsed = started.elapsed();
        info!("Scheduler shutdown complete in {:?}", elapsed);
        ShutdownReport {
            completed: true,
            abandoned: Vec::new(),
            elapsed,
        }
    }

    pub fn is_job_running(&self, job_id: &str) -> bool {
        self.jobs
            .iter()
            .any(|entry| entry.job.id() == job_id && entry.state.running.load(Ordering::Acquire))
    }

    /// Snapshot of every job, in registration order.
    pub fn job_statuses(&self) -> Vec<JobInfo> {
        self.jobs
            .iter()
            .map(|entry| JobInfo {
                id: entry.job.id().to_string(),
                name: entry.job.name().to_string(),
                description: entry.job.description().to_string(),
                schedule: entry.job.schedule().into(),
                is_running: entry.state.running.load(Ordering::Acquire),
                last_run_at: entry.state.last_run_at().map(|at| at.to_rfc3339()),
                runs: entry.state.runs.load(Ordering::Relaxed),
                failures: entry.state.failures.load(Ordering::Relaxed),
                skipped_ticks: entry.state.skipped_ticks.load(Ordering::Relaxed),
            })
            .collect()
    }

    fn running_job_ids(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|entry| entry.state.running.load(Ordering::Acquire))
            .map(|entry| entry.job.id().to_string())
            .collect()
    }
}

fn log_last_run(run_history: &dyn JobRunStore, job_id: &str) {
    match run_history.get_last_run(job_id) {
        Ok(Some(last)) => match last.duration() {
            Some(took) => info!(
                "Last run of {} started at {}: {} after {}ms",
                job_id,
                last.started_at,
                last.status.as_str(),
                took.num_milliseconds()
            ),
            None => info!(
                "Last run of {} started at {}: {}",
                job_id,
                last.started_at,
                last.status.as_str()
            ),
        },
        Ok(None) => debug!("No previous run of {}", job_id),
        Err(e) => warn!("Failed to read last run of {}: {}", job_id, e),
    }
}

struct JobLoop {
    job: Arc<dyn BackgroundJob>,
    state: Arc<JobState>,
    cadence: Cadence,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
    handle: Handle,
    run_history: Option<Arc<dyn JobRunStore>>,
}

impl JobLoop {
    async fn run(self) {
        let job_id = self.job.id();
        let startup_tick =
            self.job.run_on_startup() && matches!(self.cadence, Cadence::Interval(_));
        let mut ticker = self.cadence.ticker(startup_tick);
        let mut first_tick = true;

        loop {
            let fired = tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => break,
                fired = ticker.tick() => fired,
            };
            if !fired {
                warn!("Job {} has no upcoming scheduled time, stopping its loop", job_id);
                break;
            }
            if self.shutdown_token.is_cancelled() {
                break;
            }

            let triggered_by = if first_tick && startup_tick {
                RunTrigger::Startup
            } else {
                RunTrigger::Schedule
            };
            first_tick = false;

            let Some(guard) = RunningGuard::acquire(&self.state) else {
                self.state.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                warn!("Job {} is still running, skipping this tick", job_id);
                continue;
            };

            let execution = execute_job(
                Arc::clone(&self.job),
                Arc::clone(&self.state),
                guard,
                self.shutdown_token.child_token(),
                self.run_history.clone(),
                triggered_by,
            );
            self.tracker.spawn_on(execution, &self.handle);
        }

        debug!("Job loop for {} stopped", job_id);
    }
}

/// One execution of a job. Errors and panics end here; the loop keeps going.
async fn execute_job(
    job: Arc<dyn BackgroundJob>,
    state: Arc<JobState>,
    guard: RunningGuard,
    cancel_token: CancellationToken,
    run_history: Option<Arc<dyn JobRunStore>>,
    triggered_by: RunTrigger,
) {
    let job_id = job.id();
    let ctx = JobContext::new(cancel_token, job_id, triggered_by);
    state.set_last_run_at(ctx.started_at);

    let run_id = run_history.as_ref().and_then(|history| {
        match history.record_job_start(job_id, triggered_by) {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                None
            }
        }
    });

    info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

    let start_time = Instant::now();
    let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
    let elapsed = start_time.elapsed();

    let (status, error_msg) = match result {
        Ok(Ok(())) => {
            info!("Job {} completed successfully in {:?}", job_id, elapsed);
            (JobRunStatus::Completed, None)
        }
        Ok(Err(JobError::Cancelled)) => {
            info!("Job {} was cancelled after {:?}", job_id, elapsed);
            (JobRunStatus::Failed, Some("Cancelled".to_string()))
        }
        Ok(Err(e)) => {
            error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
            (JobRunStatus::Failed, Some(e.to_string()))
        }
        Err(e) => {
            error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
            (JobRunStatus::Failed, Some(format!("Task panic: {}", e)))
        }
    };

    state.runs.fetch_add(1, Ordering::Relaxed);
    if status == JobRunStatus::Failed {
        state.failures.fetch_add(1, Ordering::Relaxed);
    }

    if let (Some(history), Some(run_id)) = (run_history, run_id) {
        if let Err(e) = history.record_job_finish(run_id, status, error_msg) {
            error!("Failed to record job finish for {}: {}", job_id, e);
        }
    }

    drop(guard);
}
