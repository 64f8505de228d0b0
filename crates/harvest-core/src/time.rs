//! Cursor timestamp parsing and formatting.
//!
//! Cursors are stored in the configuration file in a human-readable calendar
//! format, e.g. `January 2, 2006 15:04:05` (always UTC).

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime};
use nostr::Timestamp;

/// Format used when writing cursors back to the configuration file.
pub const CURSOR_FORMAT: &str = "%B %-d, %Y %H:%M:%S";

/// Zone-less formats accepted when reading cursors, interpreted as UTC.
const PARSE_FORMATS: &[&str] = &[
    "%B %d, %Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a cursor timestamp.
///
/// Accepts the calendar format written by [`format_cursor`], ISO 8601 without
/// a zone (`2024-01-01T00:00:00`), and RFC 3339.
pub fn parse_cursor(raw: &str) -> Result<Timestamp> {
    let raw = raw.trim();

    let seconds = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .ok()
        .or_else(|| {
            PARSE_FORMATS.iter().find_map(|fmt| {
                NaiveDateTime::parse_from_str(raw, fmt)
                    .ok()
                    .map(|dt| dt.and_utc().timestamp())
            })
        })
        .ok_or_else(|| Error::InvalidTimestamp(raw.to_string()))?;

    u64::try_from(seconds)
        .map(Timestamp::from)
        .map_err(|_| Error::InvalidTimestamp(raw.to_string()))
}

/// Format a timestamp in the persisted calendar format.
pub fn format_cursor(timestamp: Timestamp) -> String {
    i64::try_from(timestamp.as_secs())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format(CURSOR_FORMAT).to_string())
        .unwrap_or_else(|| timestamp.as_secs().to_string())
}
