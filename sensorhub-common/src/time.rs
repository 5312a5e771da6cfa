//! Timestamp utilities
//!
//! Timestamps are persisted as fixed-width RFC 3339 text in UTC with
//! millisecond precision, so text ordering in SQL equals time ordering.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Format a timestamp for storage (`2026-01-02T03:04:05.678Z`)
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub fn from_storage(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid stored timestamp '{}': {}", raw, e)))
}

/// Parse an optional stored timestamp
pub fn from_storage_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(from_storage).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(0), Duration::from_millis(0));
        assert_eq!(millis_to_duration(1000), Duration::from_secs(1));
    }

    #[test]
    fn test_storage_format_is_fixed_width() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(to_storage(&ts), "2026-01-02T03:04:05.000Z");

        let later = ts + chrono::Duration::milliseconds(678);
        assert_eq!(to_storage(&later), "2026-01-02T03:04:05.678Z");
        assert!(to_storage(&later) > to_storage(&ts));
    }

    #[test]
    fn test_storage_parse() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert_eq!(from_storage(&to_storage(&ts)).unwrap(), ts);
        assert!(from_storage("yesterday").is_err());
        assert_eq!(from_storage_opt(None).unwrap(), None);
    }
}
