use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel::r2d2::PoolError;

pub mod config;
pub mod db;
pub mod http_server;
pub mod models;
pub mod observability;
pub mod schema;
pub mod services;
pub mod utils;

use self::models::*;
use crate::utils::service_day::{local_day_start, service_today};
use db::{DbError, PgPool};
use schema::{rooms, tokens};

#[derive(Debug)]
pub enum QueueError {
    Db(DbError),
    RoomNotFound(i32),
    RoomClosed(i32),
    DailyLimitReached(i32),
    DuplicateToken(i32),
    TokenNotFound(i32),
    InvalidTransition { from: String, to: TokenStatus },
}

impl From<DbError> for QueueError {
    fn from(err: DbError) -> Self {
        QueueError::Db(err)
    }
}

impl From<PoolError> for QueueError {
    fn from(err: PoolError) -> Self {
        QueueError::Db(DbError::PoolError(err))
    }
}

impl From<diesel::result::Error> for QueueError {
    fn from(err: diesel::result::Error) -> Self {
        QueueError::Db(DbError::DieselError(err))
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Db(e) => write!(f, "{}", e),
            QueueError::RoomNotFound(id) => write!(f, "Room {} not found", id),
            QueueError::RoomClosed(id) => write!(f, "Room {} is currently closed", id),
            QueueError::DailyLimitReached(id) => {
                write!(f, "Daily token limit reached for room {}", id)
            }
            QueueError::DuplicateToken(user_id) => {
                write!(f, "User {} already has a live token today", user_id)
            }
            QueueError::TokenNotFound(id) => write!(f, "Token {} not found", id),
            QueueError::InvalidTransition { from, to } => {
                write!(f, "Invalid token transition {} -> {}", from, to)
            }
        }
    }
}

impl std::error::Error for QueueError {}

/// Issues a WAITING token for today's queue. The token number continues
/// from the highest live number, so carried-forward tokens from yesterday
/// are never reissued.
pub fn join_queue(
    pool: &PgPool,
    room_id: i32,
    user_id: Option<i32>,
    tz: Tz,
) -> Result<Token, QueueError> {
    let conn = &mut pool.get()?;
    let now = Utc::now();
    let day_start = local_day_start(service_today(now, tz), tz);

    conn.transaction(|conn| {
        let room: Room = rooms::table
            .find(room_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(QueueError::RoomNotFound(room_id))?;

        if !room.is_open {
            return Err(QueueError::RoomClosed(room_id));
        }

        let todays: Vec<Token> = tokens::table
            .filter(tokens::room_id.eq(room_id))
            .filter(tokens::created_at.ge(day_start))
            .order(tokens::token_number.asc())
            .load(conn)?;

        if let Some(uid) = user_id {
            if has_live_token(&todays, uid) {
                return Err(QueueError::DuplicateToken(uid));
            }
        }

        if todays.len() as i32 >= room.daily_limit {
            return Err(QueueError::DailyLimitReached(room_id));
        }

        let new_token = NewToken {
            room_id,
            user_id,
            token_number: next_token_number(&todays),
            status: TokenStatus::Waiting.as_str(),
        };

        Ok(diesel::insert_into(tokens::table)
            .values(&new_token)
            .get_result(conn)?)
    })
}

/// Completes the room's ACTIVE token (if any) and activates the
/// lowest-numbered WAITING token of the day. Returns the activated token,
/// or None when the queue is empty.
pub fn call_next_token(pool: &PgPool, room_id: i32, tz: Tz) -> Result<Option<Token>, QueueError> {
    let conn = &mut pool.get()?;
    let now = Utc::now();
    let day_start = local_day_start(service_today(now, tz), tz);

    conn.transaction(|conn| {
        // Same lock the rollover takes, so the two never interleave.
        let _locked: i32 = rooms::table
            .find(room_id)
            .select(rooms::id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(QueueError::RoomNotFound(room_id))?;

        let todays: Vec<Token> = tokens::table
            .filter(tokens::room_id.eq(room_id))
            .filter(tokens::created_at.ge(day_start))
            .order(tokens::token_number.asc())
            .load(conn)?;

        if let Some(active) = todays
            .iter()
            .find(|t| TokenStatus::parse(&t.status) == Some(TokenStatus::Active))
        {
            ensure_transition(&active.status, TokenStatus::Completed)?;
            diesel::update(tokens::table.find(active.id))
                .set((
                    tokens::status.eq(TokenStatus::Completed.as_str()),
                    tokens::completed_at.eq(now),
                    tokens::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        let next = match todays
            .iter()
            .find(|t| TokenStatus::parse(&t.status) == Some(TokenStatus::Waiting))
        {
            Some(t) => t,
            None => return Ok(None),
        };

        ensure_transition(&next.status, TokenStatus::Active)?;
        let activated: Token = diesel::update(tokens::table.find(next.id))
            .set((
                tokens::status.eq(TokenStatus::Active.as_str()),
                tokens::called_at.eq(now),
                tokens::updated_at.eq(now),
            ))
            .get_result(conn)?;

        diesel::update(rooms::table.find(room_id))
            .set((
                rooms::current_token.eq(next.token_number),
                rooms::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok(Some(activated))
    })
}

/// Marks the room's ACTIVE token COMPLETED and clears the serving counter.
pub fn complete_current_token(pool: &PgPool, room_id: i32) -> Result<Option<Token>, QueueError> {
    let conn = &mut pool.get()?;
    let now = Utc::now();

    conn.transaction(|conn| {
        let _locked: i32 = rooms::table
            .find(room_id)
            .select(rooms::id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(QueueError::RoomNotFound(room_id))?;

        let live: Vec<Token> = tokens::table
            .filter(tokens::room_id.eq(room_id))
            .load(conn)?;

        let active = match live
            .iter()
            .find(|t| TokenStatus::parse(&t.status) == Some(TokenStatus::Active))
        {
            Some(t) => t,
            None => return Ok(None),
        };

        ensure_transition(&active.status, TokenStatus::Completed)?;
        let completed: Token = diesel::update(tokens::table.find(active.id))
            .set((
                tokens::status.eq(TokenStatus::Completed.as_str()),
                tokens::completed_at.eq(now),
                tokens::updated_at.eq(now),
            ))
            .get_result(conn)?;

        diesel::update(rooms::table.find(room_id))
            .set((rooms::current_token.eq(0), rooms::updated_at.eq(now)))
            .execute(conn)?;

        Ok(Some(completed))
    })
}

/// Operator skip: the token leaves the queue under the terminal SKIPPED
/// status.
pub fn skip_token(pool: &PgPool, room_id: i32, token_id: i32) -> Result<Token, QueueError> {
    let conn = &mut pool.get()?;
    let now = Utc::now();

    conn.transaction(|conn| {
        let _locked: i32 = rooms::table
            .find(room_id)
            .select(rooms::id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(QueueError::RoomNotFound(room_id))?;

        let token: Token = tokens::table
            .find(token_id)
            .first(conn)
            .optional()?
            .filter(|t: &Token| t.room_id == room_id)
            .ok_or(QueueError::TokenNotFound(token_id))?;

        ensure_transition(&token.status, TokenStatus::Skipped)?;

        Ok(diesel::update(tokens::table.find(token.id))
            .set((
                tokens::status.eq(TokenStatus::Skipped.as_str()),
                tokens::updated_at.eq(now),
            ))
            .get_result(conn)?)
    })
}

/// Operator requeue: an ACTIVE token goes back to WAITING under its own
/// number, with its called timestamp cleared.
pub fn requeue_token(pool: &PgPool, room_id: i32, token_id: i32) -> Result<Token, QueueError> {
    let conn = &mut pool.get()?;
    let now = Utc::now();

    conn.transaction(|conn| {
        let _locked: i32 = rooms::table
            .find(room_id)
            .select(rooms::id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(QueueError::RoomNotFound(room_id))?;

        let token: Token = tokens::table
            .find(token_id)
            .first(conn)
            .optional()?
            .filter(|t: &Token| t.room_id == room_id)
            .ok_or(QueueError::TokenNotFound(token_id))?;

        ensure_transition(&token.status, TokenStatus::Waiting)?;

        diesel::update(rooms::table.find(room_id))
            .set((rooms::current_token.eq(0), rooms::updated_at.eq(now)))
            .execute(conn)?;

        Ok(diesel::update(tokens::table.find(token.id))
            .set((
                tokens::status.eq(TokenStatus::Waiting.as_str()),
                tokens::called_at.eq(None::<DateTime<Utc>>),
                tokens::updated_at.eq(now),
            ))
            .get_result(conn)?)
    })
}

fn ensure_transition(raw: &str, next: TokenStatus) -> Result<(), QueueError> {
    let from = TokenStatus::parse(raw).ok_or_else(|| QueueError::InvalidTransition {
        from: raw.to_string(),
        to: next,
    })?;
    if !from.can_transition_to(next) {
        return Err(QueueError::InvalidTransition {
            from: raw.to_string(),
            to: next,
        });
    }
    Ok(())
}

/// Next number continues from the highest live number of the day, which
/// includes carried-forward tokens.
pub(crate) fn next_token_number(todays: &[Token]) -> i32 {
    todays.iter().map(|t| t.token_number).max().unwrap_or(0) + 1
}

pub(crate) fn has_live_token(todays: &[Token], user_id: i32) -> bool {
    todays.iter().any(|t| {
        t.user_id == Some(user_id)
            && matches!(
                TokenStatus::parse(&t.status),
                Some(TokenStatus::Waiting | TokenStatus::Active)
            )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(number: i32, status: &str, user_id: Option<i32>) -> Token {
        let created = Utc::now();
        Token {
            id: number,
            room_id: 1,
            user_id,
            token_number: number,
            status: status.to_string(),
            created_at: created,
            updated_at: created,
            called_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_numbering_starts_at_one_for_empty_day() {
        assert_eq!(next_token_number(&[]), 1);
    }

    #[test]
    fn test_numbering_continues_past_carried_forward_tokens() {
        // A carried-forward #7 must not be reissued even though only two
        // tokens are live today.
        let todays = vec![token(7, "WAITING", None), token(1, "WAITING", None)];
        assert_eq!(next_token_number(&todays), 8);
    }

    #[test]
    fn test_live_token_check_is_case_insensitive() {
        let todays = vec![token(1, "waiting", Some(5))];
        assert!(has_live_token(&todays, 5));
        assert!(!has_live_token(&todays, 6));
    }

    #[test]
    fn test_terminal_tokens_are_not_live() {
        let todays = vec![
            token(1, "COMPLETED", Some(5)),
            token(2, "SKIPPED", Some(5)),
            token(3, "EXPIRED", Some(5)),
        ];
        assert!(!has_live_token(&todays, 5));
    }

    #[test]
    fn test_ensure_transition_accepts_valid_writes() {
        assert!(ensure_transition("WAITING", TokenStatus::Active).is_ok());
        assert!(ensure_transition("active", TokenStatus::Waiting).is_ok());
    }

    #[test]
    fn test_ensure_transition_rejects_terminal_and_unknown() {
        assert!(matches!(
            ensure_transition("COMPLETED", TokenStatus::Active),
            Err(QueueError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ensure_transition("garbage", TokenStatus::Skipped),
            Err(QueueError::InvalidTransition { .. })
        ));
    }
}
