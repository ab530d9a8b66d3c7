//! Recurring trigger for the daily reset. Owns three tasks: the midnight
//! loop in the configured timezone, an hourly heartbeat, and a one-shot
//! startup reconciliation. Exactly-once across restarts is the run ledger's
//! guarantee, not the trigger's.

use crate::db::{DbError, DbPool};
use crate::observability::METRICS;
use crate::services::daily_reset::perform_daily_reset;
use crate::services::run_ledger::{self, JOB_DAILY_RESET};
use crate::utils::service_day::{duration_until_next_midnight, next_local_midnight};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::task::JoinHandle;

const STARTUP_CHECK_DELAY_SECS: u64 = 5;
const HEARTBEAT_INTERVAL_SECS: u64 = 3600;

pub struct RolloverScheduler {
    pool: DbPool,
    tz: Tz,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub active: bool,
    pub job_count: usize,
    pub timezone: String,
    pub next_midnight: Option<DateTime<Utc>>,
}

impl RolloverScheduler {
    pub fn new(pool: DbPool, tz: Tz) -> Self {
        RolloverScheduler {
            pool,
            tz,
            tasks: Vec::new(),
        }
    }

    /// Spawns the scheduler tasks. Idempotent: a started scheduler stays as
    /// it is.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            tracing::warn!("Scheduler already started");
            return;
        }

        tracing::info!(timezone = %self.tz, "Starting rollover scheduler");

        self.tasks
            .push(tokio::spawn(run_midnight_loop(self.pool.clone(), self.tz)));
        self.tasks.push(tokio::spawn(run_heartbeat_loop()));
        self.tasks.push(tokio::spawn(run_startup_reconciliation(
            self.pool.clone(),
            self.tz,
        )));

        tracing::info!("Scheduled: daily reset at 00:00 local, hourly heartbeat");
    }

    /// Cancels all future firings. Safe to call even if never started.
    pub fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Rollover scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            active: !self.tasks.is_empty(),
            job_count: self.tasks.len(),
            timezone: self.tz.to_string(),
            next_midnight: next_local_midnight(Utc::now(), self.tz),
        }
    }
}

/// Runs the orchestrator now if today's reset has not succeeded yet, e.g.
/// because the process was down at midnight.
pub fn ensure_todays_reset_ran(pool: &DbPool, tz: Tz) -> Result<(), DbError> {
    if run_ledger::has_succeeded_today(pool, JOB_DAILY_RESET, tz)? {
        tracing::info!("Daily reset already completed today");
        return Ok(());
    }

    tracing::warn!("Daily reset not run today, running now");
    perform_daily_reset(pool, tz)?;
    Ok(())
}

async fn run_midnight_loop(pool: DbPool, tz: Tz) {
    loop {
        let wait = duration_until_next_midnight(Utc::now(), tz);
        tracing::info!(
            "Next reset in {} hours {} minutes",
            wait.as_secs() / 3600,
            (wait.as_secs() % 3600) / 60
        );

        tokio::time::sleep(wait).await;

        tracing::info!("Midnight reset triggered");
        if let Err(e) = perform_daily_reset(&pool, tz) {
            tracing::error!(error = %e, "Midnight reset failed");
        }
    }
}

async fn run_heartbeat_loop() {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS)).await;
        METRICS.increment_heartbeats();
        tracing::info!("Hourly heartbeat, scheduler alive");
    }
}

// Deliberately delayed so the pool has warmed up before the first query.
async fn run_startup_reconciliation(pool: DbPool, tz: Tz) {
    tokio::time::sleep(std::time::Duration::from_secs(STARTUP_CHECK_DELAY_SECS)).await;

    tracing::info!("Running startup check for missed resets");
    if let Err(e) = ensure_todays_reset_ran(&pool, tz) {
        tracing::error!(error = %e, "Startup reset check failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;
    use diesel::r2d2::{ConnectionManager, Pool};
    use diesel::PgConnection;
    use std::sync::Arc;

    fn scheduler() -> RolloverScheduler {
        // build_unchecked: no live database is needed for these tests
        let manager = ConnectionManager::<PgConnection>::new("postgres://localhost/tokenq_test");
        let pool = Pool::builder().build_unchecked(manager);
        RolloverScheduler::new(Arc::new(pool), Kolkata)
    }

    #[test]
    fn test_status_before_start() {
        let s = scheduler();
        let status = s.status();
        assert!(!status.active);
        assert_eq!(status.job_count, 0);
        assert_eq!(status.timezone, "Asia/Kolkata");
        assert!(status.next_midnight.is_some());
    }

    #[test]
    fn test_stop_without_start_is_a_noop() {
        let mut s = scheduler();
        s.stop();
        assert!(!s.status().active);
    }
}
