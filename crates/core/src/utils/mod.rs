//! Calendar helpers
//!
//! Months are always taken in UTC. Accounting windows are half-open:
//! a month runs from the first instant of its first day up to, but not
//! including, the first instant of the next month.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};

/// Midnight at the start of the day containing `t`
pub fn day_start(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&t.date_naive().and_time(NaiveTime::MIN))
}

/// First instant of the month containing `t`
pub fn month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    let date = t.date_naive();
    let first = date - Duration::days(date.day0() as i64);
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

/// First instant of the month after the one containing `t`
pub fn next_month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    month_start(month_start(t) + Duration::days(32))
}

/// First instant of the month before the one containing `t`
pub fn previous_month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    month_start(month_start(t) - Duration::days(1))
}

/// Number of days in the month containing `t`
pub fn days_in_month(t: DateTime<Utc>) -> i64 {
    (next_month_start(t) - month_start(t)).num_days()
}

/// Number of hours in the month containing `t`
pub fn hours_in_month(t: DateTime<Utc>) -> i64 {
    (next_month_start(t) - month_start(t)).num_hours()
}

/// `YYYY-MM` label of the month containing `t`
pub fn month_key(t: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", t.year(), t.month())
}
