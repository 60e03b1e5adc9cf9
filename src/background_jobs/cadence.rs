//! Turns a [`JobSchedule`] into a tick source for a job loop.

use super::job::JobSchedule;
use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Longest accepted interval, one year.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// A validated schedule.
#[derive(Debug, Clone)]
pub enum Cadence {
    Interval(Duration),
    Cron(Box<Schedule>),
}

impl Cadence {
    pub fn parse(schedule: &JobSchedule) -> Result<Self, String> {
        match schedule {
            JobSchedule::Interval(period) if period.is_zero() => {
                Err("interval must be greater than zero".to_string())
            }
            JobSchedule::Interval(period) if *period > MAX_INTERVAL => Err(format!(
                "interval of {}s exceeds the maximum of {}s",
                period.as_secs(),
                MAX_INTERVAL.as_secs()
            )),
            JobSchedule::Interval(period) => Ok(Cadence::Interval(*period)),
            JobSchedule::Cron(expr) => {
                let schedule = parse_cron(expr)
                    .map_err(|e| format!("invalid cron expression '{}': {}", expr, e))?;
                if schedule.upcoming(Utc).next().is_none() {
                    return Err(format!("cron expression '{}' never fires", expr));
                }
                Ok(Cadence::Cron(Box::new(schedule)))
            }
        }
    }

    /// Tick source for one job loop. An interval's first tick fires after one
    /// period unless `run_on_startup` is set.
    pub fn ticker(&self, run_on_startup: bool) -> Ticker {
        match self {
            Cadence::Interval(period) => {
                let start = if run_on_startup {
                    Instant::now()
                } else {
                    Instant::now() + *period
                };
                let mut interval = tokio::time::interval_at(start, *period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Ticker::Interval(interval)
            }
            Cadence::Cron(schedule) => Ticker::Cron(schedule.clone()),
        }
    }
}

pub enum Ticker {
    Interval(Interval),
    Cron(Box<Schedule>),
}

impl Ticker {
    /// Waits for the next tick. Returns false when the schedule has no
    /// upcoming time left.
    pub async fn tick(&mut self) -> bool {
        match self {
            Ticker::Interval(interval) => {
                interval.tick().await;
                true
            }
            Ticker::Cron(schedule) => {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    return false;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

/// Parse a cron expression, prepending a seconds field to 5-field expressions.
fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    if expr.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {}", expr))
    } else {
        Schedule::from_str(expr)
    }
}
