//! Service-day boundary math. Every "which day is it" decision in the crate
//! goes through these helpers with the single configured timezone.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Civil date of the running service day in the configured timezone.
pub fn service_today(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// UTC instant at which the given local civil day begins.
/// Falls back to interpreting midnight as UTC if a DST gap swallows it.
pub fn local_day_start(day: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = day.and_hms_opt(0, 0, 0).expect("valid time");
    match midnight.and_local_timezone(tz).earliest() {
        Some(dt) => dt.to_utc(),
        None => Utc.from_utc_datetime(&midnight),
    }
}

/// Half-open UTC window [start, end) covering one local civil day.
pub fn day_bounds(day: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    (local_day_start(day, tz), local_day_start(day + Duration::days(1), tz))
}

/// UTC instant of the next local midnight strictly after `now`.
pub fn next_local_midnight(now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let local = now.with_timezone(&tz);
    let tomorrow = (local + Duration::days(1)).date_naive().and_hms_opt(0, 0, 0)?;
    tomorrow
        .and_local_timezone(tz)
        .earliest()
        .map(|dt| dt.to_utc())
}

/// Sleep duration until the next local midnight, with a 24 hour fallback
/// when a DST transition makes the target ambiguous.
pub fn duration_until_next_midnight(now: DateTime<Utc>, tz: Tz) -> std::time::Duration {
    match next_local_midnight(now, tz) {
        Some(midnight) => (midnight - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(86400)),
        None => {
            tracing::warn!("DST transition detected, using 24 hour fallback");
            std::time::Duration::from_secs(86400)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_service_today_crosses_utc_date_line() {
        // 20:00 UTC on the 14th is already the 15th in IST (UTC+5:30)
        let now = utc("2025-08-14T20:00:00Z");
        assert_eq!(
            service_today(now, Kolkata),
            NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()
        );
    }

    #[test]
    fn test_local_day_start_in_ist() {
        let day = NaiveDate::from_ymd_opt(2025, 8, 15).unwrap();
        // IST midnight is 18:30 UTC the previous evening
        assert_eq!(local_day_start(day, Kolkata), utc("2025-08-14T18:30:00Z"));
    }

    #[test]
    fn test_day_bounds_cover_24_hours() {
        let day = NaiveDate::from_ymd_opt(2025, 8, 15).unwrap();
        let (start, end) = day_bounds(day, Kolkata);
        assert_eq!(end - start, Duration::hours(24));
    }

    #[test]
    fn test_next_local_midnight_is_tomorrows() {
        let now = utc("2025-08-14T20:00:00Z"); // 01:30 IST on the 15th
        let midnight = next_local_midnight(now, Kolkata).unwrap();
        assert_eq!(midnight, utc("2025-08-15T18:30:00Z"));
    }

    #[test]
    fn test_duration_until_next_midnight_bounds() {
        let now = utc("2025-08-14T20:00:00Z");
        let wait = duration_until_next_midnight(now, Kolkata);
        assert!(wait > std::time::Duration::ZERO);
        assert!(wait <= std::time::Duration::from_secs(86400));
        // 01:30 IST -> 22h30m to the next midnight
        assert_eq!(wait, std::time::Duration::from_secs(22 * 3600 + 30 * 60));
    }
}
