//! Wall-clock helpers
//!
//! Every persisted timestamp in the workspace is an absolute unix timestamp
//! in milliseconds. Records that carry human-readable timestamps store an
//! ISO-8601 rendering alongside the numeric field, never instead of it.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Render unix milliseconds as an ISO-8601 / RFC 3339 UTC timestamp.
///
/// Out-of-range inputs render as an empty string rather than panicking;
/// the numeric field remains the source of truth.
pub fn to_iso8601(millis: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_after_2024() {
        // 2024-01-01T00:00:00Z
        assert!(now_millis() > 1_704_067_200_000);
    }

    #[test]
    fn iso8601_renders_utc_with_millis() {
        // 2025-06-15T12:00:00.500Z
        let rendered = to_iso8601(1_749_988_800_500);
        assert_eq!(rendered, "2025-06-15T12:00:00.500Z");
    }

    #[test]
    fn iso8601_epoch() {
        assert_eq!(to_iso8601(0), "1970-01-01T00:00:00.000Z");
    }
}
