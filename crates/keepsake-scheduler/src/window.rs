//! Delivery window math: one randomized send instant per local day.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use keepsake_core::error::{KeepsakeError, Result};
use keepsake_core::types::User;
use rand::Rng;

/// Resolve the user's IANA timezone identifier.
pub fn user_timezone(user: &User) -> Result<Tz> {
    user.timezone
        .parse()
        .map_err(|_| KeepsakeError::Config(format!("unknown timezone: {}", user.timezone)))
}

/// The user's current local calendar date.
pub fn local_date(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Period key for one local calendar date: "YYYY-MM-DD".
pub fn period_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Draw a uniformly random instant inside the user's quiet window on
/// the given local date.
///
/// The window is the inclusive second range `[start:00:00, end:59:59]`
/// local time; the degenerate `start == end` window collapses to the
/// single second `start:00:00`. Deterministic for a fixed rng.
pub fn compute_send_instant<R: Rng>(
    user: &User,
    date: NaiveDate,
    rng: &mut R,
) -> Result<DateTime<Utc>> {
    if !user.window_is_valid() {
        return Err(KeepsakeError::InvalidWindow(format!(
            "start={} end={} for user {}",
            user.window_start_hour, user.window_end_hour, user.id
        )));
    }

    let start_sec = u32::from(user.window_start_hour) * 3600;
    let end_sec = if user.window_start_hour == user.window_end_hour {
        start_sec
    } else {
        u32::from(user.window_end_hour) * 3600 + 3599
    };
    let second = rng.gen_range(start_sec..=end_sec);

    local_second_to_utc(user, date, second)
}

/// The instant at which the window closes (`end:59:59` local).
pub fn window_close(user: &User, date: NaiveDate) -> Result<DateTime<Utc>> {
    local_second_to_utc(user, date, u32::from(user.window_end_hour) * 3600 + 3599)
}

fn local_second_to_utc(user: &User, date: NaiveDate, second: u32) -> Result<DateTime<Utc>> {
    let tz = user_timezone(user)?;
    let naive = date
        .and_hms_opt(second / 3600, (second % 3600) / 60, second % 60)
        .ok_or_else(|| KeepsakeError::InvalidWindow(format!("second {second} out of range")))?;
    // A spring-forward gap can make the drawn local time nonexistent.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .ok_or_else(|| {
            KeepsakeError::InvalidWindow(format!("nonexistent local time {naive} in {tz}"))
        })
}
