//! Daily rollover engine. Once per service day every room is moved from
//! "yesterday" to "today": still-waiting tokens are carried forward, every
//! other token is archived into `token_history`, a `daily_stats` aggregate
//! is upserted and the room counter is reset. Each room is one atomic
//! transaction; one poison room never blocks the rest of the fleet.

use crate::db::{DbError, DbPool};
use crate::models::{DailyStatsUpsert, NewTokenHistory, Token, TokenStatus, User};
use crate::observability::METRICS;
use crate::schema::{daily_stats, rooms, token_history, tokens, users};
use crate::services::run_ledger::{self, RunCounters, JOB_DAILY_RESET};
use crate::utils::service_day::{local_day_start, service_today};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use std::time::Instant;

#[derive(Debug, Default, Clone, Copy)]
pub struct ResetOutcome {
    pub rooms_processed: i32,
    pub tokens_archived: i32,
    pub tokens_carried_forward: i32,
    pub duration_seconds: i32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RoomResetOutcome {
    pub archived: i32,
    pub carried_forward: i32,
}

/// Runs the rollover across the whole fleet and finalizes a ledger entry.
///
/// Per-room failures are logged and skipped; only errors outside the room
/// loop (room enumeration, ledger writes) abort the run, and those finalize
/// the ledger entry as FAILED with the partial counters before re-raising.
pub fn perform_daily_reset(pool: &DbPool, tz: Tz) -> Result<ResetOutcome, DbError> {
    let started = Instant::now();
    tracing::info!("Starting daily reset");

    let attempt_id = run_ledger::begin_attempt(pool, JOB_DAILY_RESET)?;
    let mut totals = RunCounters::default();

    // The SUCCESS write is part of the fallible scope: if it fails, the
    // attempt is concluded as FAILED like any other run-level error.
    let run_result = process_all_rooms(pool, tz, &mut totals).and_then(|()| {
        let duration_seconds = started.elapsed().as_secs() as i32;
        run_ledger::finalize_success(pool, attempt_id, duration_seconds, totals)?;
        Ok(duration_seconds)
    });

    match run_result {
        Ok(duration_seconds) => {
            METRICS.increment_resets_completed();
            METRICS.add_tokens_archived(totals.tokens_archived as u64);
            METRICS.add_tokens_carried_forward(totals.tokens_carried_forward as u64);

            tracing::info!(
                rooms_processed = totals.rooms_processed,
                tokens_archived = totals.tokens_archived,
                tokens_carried_forward = totals.tokens_carried_forward,
                duration_seconds,
                "Daily reset completed successfully"
            );

            Ok(ResetOutcome {
                rooms_processed: totals.rooms_processed,
                tokens_archived: totals.tokens_archived,
                tokens_carried_forward: totals.tokens_carried_forward,
                duration_seconds,
            })
        }
        Err(e) => Err(conclude_failure(pool, attempt_id, totals, e)),
    }
}

/// Marks the attempt FAILED with whatever counters accumulated and hands
/// the original error back to the caller. A failing FAILED write is logged
/// but never masks that error.
fn conclude_failure(pool: &DbPool, attempt_id: i32, totals: RunCounters, e: DbError) -> DbError {
    METRICS.increment_resets_failed();
    tracing::error!(error = %e, "Daily reset failed");

    if let Err(ledger_err) = run_ledger::finalize_failure(pool, attempt_id, &e.to_string(), totals)
    {
        tracing::error!(error = %ledger_err, "Failed to finalize ledger entry");
    }

    e
}

fn process_all_rooms(pool: &DbPool, tz: Tz, totals: &mut RunCounters) -> Result<(), DbError> {
    let room_ids: Vec<i32> = {
        let conn = &mut pool.get()?;
        rooms::table.select(rooms::id).order(rooms::id.asc()).load(conn)?
    };

    tracing::info!(rooms = room_ids.len(), "Processing rooms");

    for room_id in room_ids {
        let result = reset_room_for_new_day(pool, room_id, tz);
        record_room_result(totals, room_id, result);
    }

    Ok(())
}

/// Folds one room's result into the run totals. A failed room is logged
/// and skipped; only successful rooms count toward `rooms_processed`.
fn record_room_result(
    totals: &mut RunCounters,
    room_id: i32,
    result: Result<RoomResetOutcome, DbError>,
) {
    match result {
        Ok(outcome) => {
            totals.rooms_processed += 1;
            totals.tokens_archived += outcome.archived;
            totals.tokens_carried_forward += outcome.carried_forward;
            tracing::info!(
                room_id,
                archived = outcome.archived,
                carried_forward = outcome.carried_forward,
                "Room reset complete"
            );
        }
        Err(e) => {
            // Continue with other rooms even if one fails
            METRICS.increment_room_failures();
            tracing::error!(room_id, error = %e, "Room reset failed, continuing");
        }
    }
}

/// Rolls a single room over as one atomic unit.
///
/// Selects every token created before today's local midnight (date-driven,
/// so a multi-day outage is swept in one pass), carries WAITING tokens
/// forward and archives the rest. Any error rolls the whole room back.
pub fn reset_room_for_new_day(
    pool: &DbPool,
    room_id: i32,
    tz: Tz,
) -> Result<RoomResetOutcome, DbError> {
    let conn = &mut pool.get()?;
    let now = Utc::now();
    let today = service_today(now, tz);
    let service_date = today - Duration::days(1);
    let day_start = local_day_start(today, tz);

    let outcome = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        // Serializes against call-next/skip, which also lock the room row.
        let _locked: i32 = rooms::table
            .find(room_id)
            .select(rooms::id)
            .for_update()
            .first(conn)?;

        let rows: Vec<(Token, Option<User>)> = tokens::table
            .left_join(users::table)
            .filter(tokens::room_id.eq(room_id))
            .filter(tokens::created_at.lt(day_start))
            .select((Token::as_select(), Option::<User>::as_select()))
            .load(conn)?;

        if rows.is_empty() {
            return Ok(RoomResetOutcome::default());
        }

        let plan = plan_room_reset(&rows, day_start, service_date, now);

        if !plan.carry_forward_ids.is_empty() {
            diesel::update(tokens::table.filter(tokens::id.eq_any(&plan.carry_forward_ids)))
                .set((tokens::created_at.eq(now), tokens::updated_at.eq(now)))
                .execute(conn)?;
        }

        if !plan.archives.is_empty() {
            diesel::insert_into(token_history::table)
                .values(&plan.archives)
                .execute(conn)?;
            diesel::delete(tokens::table.filter(tokens::id.eq_any(&plan.archived_ids)))
                .execute(conn)?;
        }

        let stats = plan.stats_row(room_id, service_date, now);
        diesel::insert_into(daily_stats::table)
            .values(&stats)
            .on_conflict((daily_stats::room_id, daily_stats::service_date))
            .do_update()
            .set(&stats)
            .execute(conn)?;

        // No token is active after rollover; call-next starts the new day.
        diesel::update(rooms::table.find(room_id))
            .set((rooms::current_token.eq(0), rooms::updated_at.eq(now)))
            .execute(conn)?;

        Ok(RoomResetOutcome {
            archived: plan.archives.len() as i32,
            carried_forward: plan.carry_forward_ids.len() as i32,
        })
    })?;

    Ok(outcome)
}

/// Everything the per-room transaction writes, computed up front from the
/// selected rows. Pure so the partition rules are testable without a store.
#[derive(Debug, Default)]
pub(crate) struct RoomResetPlan {
    pub carry_forward_ids: Vec<i32>,
    pub archived_ids: Vec<i32>,
    pub archives: Vec<NewTokenHistory>,
    pub completed_count: i32,
    pub expired_count: i32,
    pub avg_wait_time_minutes: Option<f64>,
    pub avg_service_duration_minutes: Option<f64>,
}

impl RoomResetPlan {
    pub fn total(&self) -> i32 {
        (self.carry_forward_ids.len() + self.archived_ids.len()) as i32
    }

    pub fn stats_row(&self, room_id: i32, service_date: NaiveDate, now: DateTime<Utc>) -> DailyStatsUpsert {
        DailyStatsUpsert {
            room_id,
            service_date,
            total_tokens: self.total(),
            completed_tokens: self.completed_count,
            expired_tokens: self.expired_count,
            active_tokens: self.carry_forward_ids.len() as i32,
            avg_wait_time_minutes: self.avg_wait_time_minutes,
            avg_service_duration_minutes: self.avg_service_duration_minutes,
            updated_at: now,
        }
    }
}

/// The rollover touches only tokens created strictly before the current
/// day's local midnight. Carried-forward tokens are re-dated to "now", so
/// an immediate second run no longer selects them.
pub(crate) fn is_eligible_for_rollover(
    created_at: DateTime<Utc>,
    day_start: DateTime<Utc>,
) -> bool {
    created_at < day_start
}

/// Partitions the eligible tokens: WAITING carries forward with its number,
/// everything else archives. An ACTIVE token was never completed, so it
/// archives as EXPIRED; unrecognized statuses archive under their uppercased
/// raw value. Averages exclude tokens without the relevant timestamps.
pub(crate) fn plan_room_reset(
    rows: &[(Token, Option<User>)],
    day_start: DateTime<Utc>,
    service_date: NaiveDate,
    archived_at: DateTime<Utc>,
) -> RoomResetPlan {
    let mut plan = RoomResetPlan::default();
    let mut wait_times: Vec<i32> = Vec::new();
    let mut service_times: Vec<i32> = Vec::new();

    for (token, user) in rows {
        if !is_eligible_for_rollover(token.created_at, day_start) {
            continue;
        }

        if TokenStatus::parse(&token.status) == Some(TokenStatus::Waiting) {
            plan.carry_forward_ids.push(token.id);
            continue;
        }

        let final_status = match TokenStatus::parse(&token.status) {
            Some(TokenStatus::Active) => TokenStatus::Expired.as_str().to_string(),
            Some(status) => status.as_str().to_string(),
            None => token.status.to_uppercase(),
        };

        let wait_time_minutes = token
            .called_at
            .map(|called| whole_minutes(token.created_at, called));
        if let Some(minutes) = wait_time_minutes {
            wait_times.push(minutes);
        }

        let service_duration_minutes = match (token.called_at, token.completed_at) {
            (Some(called), Some(completed)) => Some(whole_minutes(called, completed)),
            _ => None,
        };
        if let Some(minutes) = service_duration_minutes {
            service_times.push(minutes);
        }

        if final_status == TokenStatus::Completed.as_str() {
            plan.completed_count += 1;
        }
        if final_status == TokenStatus::Expired.as_str() {
            plan.expired_count += 1;
        }

        plan.archived_ids.push(token.id);
        plan.archives.push(NewTokenHistory {
            room_id: token.room_id,
            user_id: token.user_id,
            token_number: token.token_number,
            service_date,
            final_status,
            wait_time_minutes,
            service_duration_minutes,
            created_at: token.created_at,
            called_at: token.called_at,
            completed_at: token.completed_at,
            user_name: user.as_ref().map(|u| u.name.clone()),
            user_email: user.as_ref().map(|u| u.email.clone()),
            user_firebase_uid: user.as_ref().and_then(|u| u.firebase_uid.clone()),
            archived_at,
        });
    }

    plan.avg_wait_time_minutes = mean(&wait_times);
    plan.avg_service_duration_minutes = mean(&service_times);

    plan
}

fn whole_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> i32 {
    (to - from).num_seconds().div_euclid(60) as i32
}

fn mean(values: &[i32]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn token(id: i32, number: i32, status: &str) -> Token {
        let created = ts("2025-08-14T04:30:00Z");
        Token {
            id,
            room_id: 1,
            user_id: Some(10),
            token_number: number,
            status: status.to_string(),
            created_at: created,
            updated_at: created,
            called_at: None,
            completed_at: None,
        }
    }

    fn user(name: &str) -> User {
        User {
            id: 10,
            name: name.to_string(),
            email: format!("{}@example.com", name),
            firebase_uid: Some(format!("uid-{}", name)),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn yesterday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 14).unwrap()
    }

    // IST midnight that opens Aug 15, i.e. the eligibility cutoff
    fn day_start() -> DateTime<Utc> {
        ts("2025-08-14T18:30:00Z")
    }

    fn archived_at() -> DateTime<Utc> {
        ts("2025-08-14T18:30:05Z")
    }

    #[test]
    fn test_every_token_is_carried_or_archived_exactly_once() {
        let rows = vec![
            (token(1, 1, "WAITING"), None),
            (token(2, 2, "ACTIVE"), None),
            (token(3, 3, "COMPLETED"), None),
            (token(4, 4, "SKIPPED"), None),
            (token(5, 5, "garbage"), None),
        ];

        let plan = plan_room_reset(&rows, day_start(), yesterday(), archived_at());

        assert_eq!(plan.total() as usize, rows.len());
        assert_eq!(plan.carry_forward_ids, vec![1]);
        assert_eq!(plan.archived_ids, vec![2, 3, 4, 5]);
        assert_eq!(plan.archives.len(), 4);
        for (t, _) in &rows {
            let carried = plan.carry_forward_ids.contains(&t.id);
            let archived = plan.archived_ids.contains(&t.id);
            assert!(carried != archived, "token {} must go exactly one way", t.id);
        }
    }

    #[test]
    fn test_status_partition_is_case_insensitive() {
        for raw in ["Waiting", "WAITING", "waiting"] {
            let plan = plan_room_reset(&[(token(1, 1, raw), None)], day_start(), yesterday(), archived_at());
            assert_eq!(plan.carry_forward_ids, vec![1]);
        }
        for raw in ["Active", "ACTIVE", "active"] {
            let plan = plan_room_reset(&[(token(1, 1, raw), None)], day_start(), yesterday(), archived_at());
            assert_eq!(plan.archives[0].final_status, "EXPIRED");
        }
    }

    #[test]
    fn test_active_token_expires_with_null_service_duration() {
        let mut t = token(7, 4, "ACTIVE");
        t.called_at = Some(ts("2025-08-14T05:00:00Z"));

        let plan = plan_room_reset(&[(t, None)], day_start(), yesterday(), archived_at());

        let archive = &plan.archives[0];
        assert_eq!(archive.final_status, "EXPIRED");
        assert_eq!(archive.wait_time_minutes, Some(30));
        assert_eq!(archive.service_duration_minutes, None);
        assert_eq!(plan.expired_count, 1);
        assert_eq!(plan.avg_service_duration_minutes, None);
    }

    #[test]
    fn test_unknown_status_archives_under_uppercased_raw_value() {
        let plan = plan_room_reset(
            &[(token(9, 1, "cancelled"), None)],
            day_start(),
            yesterday(),
            archived_at(),
        );
        assert_eq!(plan.archives[0].final_status, "CANCELLED");
        assert_eq!(plan.completed_count, 0);
        assert_eq!(plan.expired_count, 0);
    }

    #[test]
    fn test_average_excludes_tokens_without_timestamps() {
        // waits of 10, 20, none, 30 minutes -> average 20
        let mut rows = Vec::new();
        for (id, wait) in [(1, Some(10)), (2, Some(20)), (3, None), (4, Some(30))] {
            let mut t = token(id, id, "COMPLETED");
            t.called_at = wait.map(|m| t.created_at + Duration::minutes(m));
            rows.push((t, None));
        }

        let plan = plan_room_reset(&rows, day_start(), yesterday(), archived_at());

        assert_eq!(plan.avg_wait_time_minutes, Some(20.0));
        assert_eq!(plan.avg_service_duration_minutes, None);
    }

    #[test]
    fn test_wait_and_service_minutes_are_floored() {
        let mut t = token(1, 1, "COMPLETED");
        t.called_at = Some(t.created_at + Duration::seconds(119)); // 1m59s
        t.completed_at = Some(t.called_at.unwrap() + Duration::seconds(425)); // 7m5s

        let plan = plan_room_reset(&[(t, None)], day_start(), yesterday(), archived_at());

        assert_eq!(plan.archives[0].wait_time_minutes, Some(1));
        assert_eq!(plan.archives[0].service_duration_minutes, Some(7));
    }

    #[test]
    fn test_user_snapshot_is_denormalized_into_archive() {
        let plan = plan_room_reset(
            &[(token(1, 1, "COMPLETED"), Some(user("asha")))],
            day_start(),
            yesterday(),
            archived_at(),
        );

        let archive = &plan.archives[0];
        assert_eq!(archive.user_name.as_deref(), Some("asha"));
        assert_eq!(archive.user_email.as_deref(), Some("asha@example.com"));
        assert_eq!(archive.user_firebase_uid.as_deref(), Some("uid-asha"));
    }

    #[test]
    fn test_guest_token_archives_without_user_snapshot() {
        let mut t = token(1, 1, "COMPLETED");
        t.user_id = None;

        let plan = plan_room_reset(&[(t, None)], day_start(), yesterday(), archived_at());

        let archive = &plan.archives[0];
        assert_eq!(archive.user_id, None);
        assert_eq!(archive.user_name, None);
        assert_eq!(archive.user_email, None);
    }

    #[test]
    fn test_empty_selection_produces_empty_plan() {
        let plan = plan_room_reset(&[], day_start(), yesterday(), archived_at());
        assert_eq!(plan.total(), 0);
        assert!(plan.archives.is_empty());
        assert_eq!(plan.avg_wait_time_minutes, None);
    }

    // Scenario from the rollover contract: one waiting token carries, one
    // completed token (7 minute service) archives, stats reflect both.
    #[test]
    fn test_waiting_and_completed_room_scenario() {
        let waiting = token(31, 3, "WAITING");

        let mut completed = token(22, 2, "COMPLETED");
        completed.called_at = Some(ts("2025-08-14T04:30:00Z")); // 10:00 IST
        completed.completed_at = Some(ts("2025-08-14T04:37:00Z")); // 10:07 IST

        let plan = plan_room_reset(
            &[(waiting, None), (completed, Some(user("ravi")))],
            day_start(),
            yesterday(),
            archived_at(),
        );

        assert_eq!(plan.carry_forward_ids, vec![31]);
        assert_eq!(plan.archived_ids, vec![22]);
        assert_eq!(plan.archives[0].final_status, "COMPLETED");
        assert_eq!(plan.archives[0].service_duration_minutes, Some(7));
        assert_eq!(plan.archives[0].token_number, 2);

        let stats = plan.stats_row(1, yesterday(), archived_at());
        assert_eq!(stats.total_tokens, 2);
        assert_eq!(stats.completed_tokens, 1);
        assert_eq!(stats.expired_tokens, 0);
        assert_eq!(stats.active_tokens, 1);
        assert_eq!(stats.avg_service_duration_minutes, Some(7.0));
    }

    #[test]
    fn test_archived_plus_carried_equals_selected() {
        let rows: Vec<(Token, Option<User>)> = (1..=50)
            .map(|i| {
                let status = match i % 4 {
                    0 => "WAITING",
                    1 => "COMPLETED",
                    2 => "ACTIVE",
                    _ => "SKIPPED",
                };
                (token(i, i, status), None)
            })
            .collect();

        let plan = plan_room_reset(&rows, day_start(), yesterday(), archived_at());
        assert_eq!(
            plan.carry_forward_ids.len() + plan.archives.len(),
            rows.len()
        );
    }

    #[test]
    fn test_rollover_eligibility_is_strictly_before_day_start() {
        let cutoff = day_start();
        assert!(is_eligible_for_rollover(cutoff - Duration::seconds(1), cutoff));
        assert!(!is_eligible_for_rollover(cutoff, cutoff));
        assert!(!is_eligible_for_rollover(cutoff + Duration::hours(3), cutoff));
    }

    // After a reset the carried tokens are re-stamped with today's timestamp
    // and the archived ones are gone; replaying the same day must be a no-op.
    #[test]
    fn test_second_run_selects_nothing() {
        let rows = vec![
            (token(1, 1, "WAITING"), None),
            (token(2, 2, "COMPLETED"), Some(user("ravi"))),
            (token(3, 3, "ACTIVE"), None),
        ];
        let first = plan_room_reset(&rows, day_start(), yesterday(), archived_at());
        assert_eq!(first.total(), 3);

        let survivors: Vec<(Token, Option<User>)> = rows
            .into_iter()
            .filter(|(t, _)| first.carry_forward_ids.contains(&t.id))
            .map(|(mut t, u)| {
                t.created_at = archived_at();
                t.updated_at = archived_at();
                (t, u)
            })
            .collect();
        assert_eq!(survivors.len(), 1);

        let second = plan_room_reset(&survivors, day_start(), yesterday(), archived_at());
        assert_eq!(second.total(), 0);
        assert!(second.carry_forward_ids.is_empty());
        assert!(second.archives.is_empty());
    }

    #[test]
    fn test_failed_room_is_skipped_but_totals_keep_other_rooms() {
        let mut totals = RunCounters::default();

        record_room_result(
            &mut totals,
            1,
            Ok(RoomResetOutcome {
                archived: 4,
                carried_forward: 2,
            }),
        );
        record_room_result(
            &mut totals,
            2,
            Err(DbError::DieselError(diesel::result::Error::NotFound)),
        );
        record_room_result(
            &mut totals,
            3,
            Ok(RoomResetOutcome {
                archived: 1,
                carried_forward: 0,
            }),
        );

        assert_eq!(totals.rooms_processed, 2);
        assert_eq!(totals.tokens_archived, 5);
        assert_eq!(totals.tokens_carried_forward, 2);
    }

    // A run-level failure must bump the failure counter and hand back the
    // original error even when the ledger write itself cannot go through.
    #[test]
    fn test_run_failure_is_counted_and_error_preserved() {
        use diesel::r2d2::{ConnectionManager, Pool};
        use std::sync::Arc;
        use std::time::Duration as StdDuration;

        let manager =
            ConnectionManager::<PgConnection>::new("postgres://localhost:1/unreachable");
        let pool = Arc::new(
            Pool::builder()
                .connection_timeout(StdDuration::from_millis(50))
                .build_unchecked(manager),
        );

        let failed_before = METRICS.snapshot().resets_failed;
        let e = conclude_failure(
            &pool,
            1,
            RunCounters::default(),
            DbError::DieselError(diesel::result::Error::NotFound),
        );

        assert!(matches!(
            e,
            DbError::DieselError(diesel::result::Error::NotFound)
        ));
        assert_eq!(METRICS.snapshot().resets_failed, failed_before + 1);
    }
}
