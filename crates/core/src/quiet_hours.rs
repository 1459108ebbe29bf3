//! Quiet-hours window evaluation.
//!
//! A window is `[start, end)` in the user's local time. When `end` is earlier
//! than `start` the window wraps midnight (e.g. `22:00`–`08:00`). A window
//! whose start equals its end is empty.

use chrono::{Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::CoreError;
use crate::preferences::QuietHours;
use crate::types::Timestamp;

/// Parse an `HH:MM` local time.
pub fn parse_local_time(value: &str) -> Result<NaiveTime, CoreError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| CoreError::Validation(format!("Invalid time '{value}', expected HH:MM")))
}

/// Parse an IANA timezone name.
pub fn parse_timezone(value: &str) -> Result<Tz, CoreError> {
    value
        .parse::<Tz>()
        .map_err(|_| CoreError::Validation(format!("Unknown timezone '{value}'")))
}

/// Whether `time` falls inside the `[start, end)` window, wrapping midnight
/// when `end < start`.
pub fn is_within_window(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start == end {
        return false;
    }
    if start < end {
        start <= time && time < end
    } else {
        time >= start || time < end
    }
}

impl QuietHours {
    /// If `now` falls inside the quiet window, return the UTC instant the
    /// window ends. Returns `None` when quiet hours are disabled or `now` is
    /// outside the window.
    pub fn deferral_until(&self, now: Timestamp) -> Result<Option<Timestamp>, CoreError> {
        if !self.enabled {
            return Ok(None);
        }

        let tz = parse_timezone(&self.timezone)?;
        let start = parse_local_time(&self.start_time)?;
        let end = parse_local_time(&self.end_time)?;

        let local = now.with_timezone(&tz);
        let time = local.time();
        if !is_within_window(time, start, end) {
            return Ok(None);
        }

        // Wrapped window entered before midnight ends on the next local day.
        let end_date = if start > end && time >= start {
            local.date_naive() + Duration::days(1)
        } else {
            local.date_naive()
        };

        Ok(Some(resolve_local(tz, end_date, end)))
    }
}

/// Convert a local wall-clock time to UTC, stepping forward over DST gaps
/// and picking the earlier instant of an ambiguous (repeated) hour.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Timestamp {
    let mut naive = date.and_time(time);
    loop {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => naive += Duration::minutes(15),
        }
    }
}
