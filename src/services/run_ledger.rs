//! Append-only ledger of reset attempts over `cron_logs`. One row per
//! attempt; the SUCCESS row for today's civil date is the idempotency gate.

use crate::db::{DbError, DbPool};
use crate::models::NewCronLog;
use crate::schema::cron_logs;
use crate::utils::service_day::{day_bounds, service_today};
use chrono::Utc;
use chrono_tz::Tz;
use diesel::prelude::*;

pub const JOB_DAILY_RESET: &str = "daily_reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunCounters {
    pub rooms_processed: i32,
    pub tokens_archived: i32,
    pub tokens_carried_forward: i32,
}

pub fn begin_attempt(pool: &DbPool, job_name: &str) -> Result<i32, DbError> {
    let conn = &mut pool.get()?;

    let new_log = NewCronLog {
        job_name,
        status: RunStatus::Running.as_str(),
        started_at: Utc::now(),
    };

    Ok(diesel::insert_into(cron_logs::table)
        .values(&new_log)
        .returning(cron_logs::id)
        .get_result(conn)?)
}

pub fn finalize_success(
    pool: &DbPool,
    attempt_id: i32,
    duration_seconds: i32,
    counters: RunCounters,
) -> Result<(), DbError> {
    let conn = &mut pool.get()?;

    diesel::update(cron_logs::table.find(attempt_id))
        .set((
            cron_logs::status.eq(RunStatus::Success.as_str()),
            cron_logs::completed_at.eq(Utc::now()),
            cron_logs::duration_seconds.eq(duration_seconds),
            cron_logs::rooms_processed.eq(counters.rooms_processed),
            cron_logs::tokens_archived.eq(counters.tokens_archived),
            cron_logs::tokens_carried_forward.eq(counters.tokens_carried_forward),
        ))
        .execute(conn)?;

    Ok(())
}

/// Marks the attempt FAILED, keeping whatever counters accumulated before
/// the failure.
pub fn finalize_failure(
    pool: &DbPool,
    attempt_id: i32,
    error_message: &str,
    partial: RunCounters,
) -> Result<(), DbError> {
    let conn = &mut pool.get()?;

    diesel::update(cron_logs::table.find(attempt_id))
        .set((
            cron_logs::status.eq(RunStatus::Failed.as_str()),
            cron_logs::completed_at.eq(Utc::now()),
            cron_logs::error_message.eq(error_message),
            cron_logs::rooms_processed.eq(partial.rooms_processed),
            cron_logs::tokens_archived.eq(partial.tokens_archived),
            cron_logs::tokens_carried_forward.eq(partial.tokens_carried_forward),
        ))
        .execute(conn)?;

    Ok(())
}

/// True when a SUCCESS attempt of `job_name` started inside today's local
/// civil day. The trigger never re-runs a day this returns true for.
pub fn has_succeeded_today(pool: &DbPool, job_name: &str, tz: Tz) -> Result<bool, DbError> {
    let conn = &mut pool.get()?;
    let (day_start, day_end) = day_bounds(service_today(Utc::now(), tz), tz);

    let found: Option<i32> = cron_logs::table
        .filter(cron_logs::job_name.eq(job_name))
        .filter(cron_logs::status.eq(RunStatus::Success.as_str()))
        .filter(cron_logs::started_at.ge(day_start))
        .filter(cron_logs::started_at.lt(day_end))
        .select(cron_logs::id)
        .order(cron_logs::started_at.desc())
        .first(conn)
        .optional()?;

    Ok(found.is_some())
}

/// Most recent attempt of a job, regardless of outcome. Surfaced by the
/// status endpoint.
pub fn latest_run(
    pool: &DbPool,
    job_name: &str,
) -> Result<Option<crate::models::CronLog>, DbError> {
    let conn = &mut pool.get()?;

    Ok(cron_logs::table
        .filter(cron_logs::job_name.eq(job_name))
        .order(cron_logs::started_at.desc())
        .first(conn)
        .optional()?)
}
