//! Start-time grammar and small formatting helpers. The grammar is fixed on
//! purpose: a relative offset (`2h`, `90m`, `1h30m`) or an absolute UTC
//! instant (`YYYY-MM-DD HH:MM`). Anything fancier belongs to the caller.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::OpError;

/// Shortest accepted relative offset. Gives people enough time to actually
/// show up before the departure notice fires.
pub const MIN_START_LEAD_MINUTES: i64 = 15;

/// Furthest a start time may be scheduled out.
pub const MAX_START_LEAD_DAYS: i64 = 365;

/// Parses the user-entered start time against the fixed grammar.
pub fn parse_start_time(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, OpError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(OpError::validation("Start time is required"));
    }

    let start = if let Some(minutes) = parse_offset_minutes(raw) {
        if minutes < MIN_START_LEAD_MINUTES {
            return Err(OpError::validation(format!(
                "Deployments must start at least {MIN_START_LEAD_MINUTES} minutes from now"
            )));
        }
        now + Duration::minutes(minutes)
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M") {
        naive.and_utc()
    } else {
        return Err(OpError::validation(format!(
            "Invalid start time: {raw}; use an offset like 1h30m or YYYY-MM-DD HH:MM (UTC)"
        )));
    };

    if start <= now {
        return Err(OpError::validation("Start time must be in the future"));
    }
    if start > now + Duration::days(MAX_START_LEAD_DAYS) {
        return Err(OpError::validation(
            "Start time is too far in the future",
        ));
    }
    Ok(start)
}

/// `2h`, `45m`, `1h30m`. Returns `None` when the input isn't in offset form.
fn parse_offset_minutes(raw: &str) -> Option<i64> {
    let mut minutes: i64 = 0;
    let mut digits = String::new();
    let mut saw_part = false;
    for ch in raw.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            'h' | 'H' => {
                let value: i64 = digits.parse().ok()?;
                minutes += value * 60;
                digits.clear();
                saw_part = true;
            }
            'm' | 'M' => {
                let value: i64 = digits.parse().ok()?;
                minutes += value;
                digits.clear();
                saw_part = true;
            }
            _ => return None,
        }
    }
    if !saw_part || !digits.is_empty() {
        return None;
    }
    Some(minutes)
}

/// Compact `1h 2m 3s` rendering for log records.
pub fn format_duration(total_seconds: i64) -> String {
    let total_seconds = total_seconds.max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}
