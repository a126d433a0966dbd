//! Time and number formatting helpers.
//!
//! Shared by the sandbox helper surface (`q.parseTime`, `q.formatDuration`,
//! `q.formatPercent`) and the metric expression function table, so the two
//! agree on every edge case.

/// Parse a `"HH:MM"` 24-hour string into total minutes.
///
/// Returns `None` for anything that is not two colon-separated integers
/// with minutes in `0..60`. Hours above 23 are accepted so durations such
/// as `"25:30"` parse (durations are not clock times).
#[must_use]
pub fn parse_time(s: &str) -> Option<i64> {
    let (hours, minutes) = s.split_once(':')?;
    if hours.is_empty() || minutes.len() != 2 {
        return None;
    }
    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    if hours < 0 || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Format a minute count as `"HH:MM"` with a leading zero on both fields.
#[must_use]
pub fn format_duration(minutes: i64) -> String {
    let minutes = minutes.max(0);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Format `value` out of `total` as an integer percentage string, e.g. `"75%"`.
///
/// A zero or negative total yields `"0%"`.
#[must_use]
pub fn format_percent(value: f64, total: f64) -> String {
    if total <= 0.0 || !total.is_finite() || !value.is_finite() {
        return "0%".to_string();
    }
    format!("{}%", (value / total * 100.0).round() as i64)
}
