//! Epoch-millisecond timestamps.
//!
//! Account files, token expiries and pending switches all store Unix epoch
//! milliseconds (UTC), matching the companion tool.

use chrono::{DateTime, LocalResult, SecondsFormat, TimeZone, Utc};

#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch milliseconds as a `DateTime<Utc>`, clamped to chrono's range.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None if ms < 0 => DateTime::<Utc>::MIN_UTC,
        LocalResult::None => DateTime::<Utc>::MAX_UTC,
    }
}

/// RFC 3339 rendering (second precision) for display.
pub fn format_ms(ms: i64) -> String {
    ms_to_datetime(ms).to_rfc3339_opts(SecondsFormat::Secs, true)
}
