use crate::schema::{cron_logs, daily_stats, token_history, tokens};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

/// Closed set of live token states. Stored as uppercase strings; parsing is
/// case-insensitive because older rows were written with mixed casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Waiting,
    Active,
    Completed,
    Expired,
    Skipped,
}

impl TokenStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "WAITING" => Some(TokenStatus::Waiting),
            "ACTIVE" => Some(TokenStatus::Active),
            "COMPLETED" => Some(TokenStatus::Completed),
            "EXPIRED" => Some(TokenStatus::Expired),
            "SKIPPED" => Some(TokenStatus::Skipped),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenStatus::Waiting => "WAITING",
            TokenStatus::Active => "ACTIVE",
            TokenStatus::Completed => "COMPLETED",
            TokenStatus::Expired => "EXPIRED",
            TokenStatus::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TokenStatus::Completed | TokenStatus::Expired | TokenStatus::Skipped
        )
    }

    /// Transition table enforced at every status write.
    /// ACTIVE -> WAITING is the operator "requeue" action.
    pub fn can_transition_to(self, next: TokenStatus) -> bool {
        use TokenStatus::*;
        matches!(
            (self, next),
            (Waiting, Active)
                | (Waiting, Skipped)
                | (Active, Completed)
                | (Active, Expired)
                | (Active, Waiting)
                | (Active, Skipped)
        )
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = crate::schema::rooms)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Room {
    pub id: i32,
    pub name: String,
    pub admin_id: i32,
    pub is_open: bool,
    pub daily_limit: i32,
    pub current_token: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations)]
#[diesel(belongs_to(Room))]
#[diesel(table_name = crate::schema::tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Token {
    pub id: i32,
    pub room_id: i32,
    pub user_id: Option<i32>,
    pub token_number: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Insertable)]
#[diesel(table_name = tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewToken<'a> {
    pub room_id: i32,
    pub user_id: Option<i32>,
    pub token_number: i32,
    pub status: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub firebase_uid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Immutable archive row. Owned fields because rows are composed by the
/// reset planner before the insert happens.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = token_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewTokenHistory {
    pub room_id: i32,
    pub user_id: Option<i32>,
    pub token_number: i32,
    pub service_date: NaiveDate,
    pub final_status: String,
    pub wait_time_minutes: Option<i32>,
    pub service_duration_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_firebase_uid: Option<String>,
    pub archived_at: DateTime<Utc>,
}

/// One aggregate row per (room, service_date). `treat_none_as_null` so a
/// re-run overwrites stale averages with NULL instead of keeping them.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = daily_stats)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DailyStatsUpsert {
    pub room_id: i32,
    pub service_date: NaiveDate,
    pub total_tokens: i32,
    pub completed_tokens: i32,
    pub expired_tokens: i32,
    pub active_tokens: i32,
    pub avg_wait_time_minutes: Option<f64>,
    pub avg_service_duration_minutes: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = cron_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CronLog {
    pub id: i32,
    pub job_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i32>,
    pub rooms_processed: Option<i32>,
    pub tokens_archived: Option<i32>,
    pub tokens_carried_forward: Option<i32>,
    pub error_message: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = cron_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewCronLog<'a> {
    pub job_name: &'a str,
    pub status: &'a str,
    pub started_at: DateTime<Utc>,
}
