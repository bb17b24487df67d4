//! # Calendar-Aligned Scheduling
//!
//! Boundaries are multiples of the interval counted from the top of the
//! current hour. For intervals that do not divide 60 the last slot of the
//! hour is cut short: with 25 minutes the boundaries are :00, :25, :50, then
//! the next :00.

use chrono::{DateTime, Local, TimeDelta, TimeZone, Timelike};
use tokio::time::sleep;

/// The first boundary strictly after `now`.
///
/// `interval_minutes` is clamped to `1..=60`.
pub fn next_boundary<Tz: TimeZone>(now: &DateTime<Tz>, interval_minutes: u32) -> DateTime<Tz> {
    let interval = interval_minutes.clamp(1, 60);
    let next_minute = (now.minute() / interval + 1) * interval;

    let top_of_hour = now
        .with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_minute(0));

    match top_of_hour {
        Some(top) if next_minute >= 60 => top + TimeDelta::hours(1),
        Some(top) => top + TimeDelta::minutes(i64::from(next_minute)),
        // Only reachable inside a local-time gap; fall back to a plain delay.
        None => now.clone() + TimeDelta::minutes(i64::from(interval)),
    }
}

/// Sleeps until the next boundary in local time.
pub async fn wait_until_next_boundary(interval_minutes: u32) {
    let now = Local::now();
    let next = next_boundary(&now, interval_minutes);
    let wait = (next - now).to_std().unwrap_or_default();
    sleep(wait).await;
}
