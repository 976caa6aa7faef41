// src/utils/date.rs

//! Campaign end-time parsing.
//!
//! The pricing API has been observed to return all of:
//!
//! - `2030-05-19T17:24:00Z` / `2030-05-19T17:24:00+00:00` (ISO-8601)
//! - `2030-05-19 17:24:00+00:00` (space separator)
//! - `2030-05-19 17:24:00` (space separator, no zone; read as UTC)
//!
//! Anything else, including an empty or missing value, maps to
//! [`never_expires`] instead of failing the record.

use chrono::{DateTime, TimeZone, Utc};

/// Length of `YYYY-MM-DDTHH:MM:SS`.
const DATE_TIME_LEN: usize = 19;

/// Fixed far-future instant used when no usable end time is available.
pub fn never_expires() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 5, 19, 17, 24, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Parse a campaign end time, falling back to [`never_expires`].
pub fn parse_expiry(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return never_expires();
    };

    let candidate = if raw.contains('T') {
        raw.to_string()
    } else if raw.contains(' ') {
        normalize_space_separated(raw)
    } else {
        raw.to_string()
    };

    DateTime::parse_from_rfc3339(&candidate)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| never_expires())
}

/// `2030-05-19 17:24:00` → `2030-05-19T17:24:00Z`; an existing zone is kept.
fn normalize_space_separated(raw: &str) -> String {
    let mut normalized = raw.replacen(' ', "T", 1);
    if !has_zone(&normalized) {
        normalized.push('Z');
    }
    normalized
}

fn has_zone(date_time: &str) -> bool {
    if date_time.contains('+') || date_time.contains('Z') {
        return true;
    }
    // A negative offset can only start after the date-time portion.
    date_time
        .get(DATE_TIME_LEN..)
        .and_then(|tail| tail.find('-'))
        .is_some_and(|idx| date_time.len() > DATE_TIME_LEN + idx + 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_iso_with_zulu() {
        assert_eq!(
            parse_expiry(Some("2031-01-02T03:04:05Z")),
            utc(2031, 1, 2, 3, 4, 5)
        );
    }

    #[test]
    fn test_space_separator_matches_iso() {
        let spaced = parse_expiry(Some("2030-05-19 17:24:00+00:00"));
        let iso = parse_expiry(Some("2030-05-19T17:24:00+00:00"));
        assert_eq!(spaced, iso);
        assert_eq!(spaced, utc(2030, 5, 19, 17, 24, 0));
    }

    #[test]
    fn test_space_separator_without_zone_is_utc() {
        assert_eq!(
            parse_expiry(Some("2026-11-01 08:00:00")),
            utc(2026, 11, 1, 8, 0, 0)
        );
    }

    #[test]
    fn test_negative_offset() {
        assert_eq!(
            parse_expiry(Some("2026-11-01 08:00:00-05:00")),
            utc(2026, 11, 1, 13, 0, 0)
        );
        assert_eq!(
            parse_expiry(Some("2026-11-01T08:00:00-05:00")),
            utc(2026, 11, 1, 13, 0, 0)
        );
    }

    #[test]
    fn test_fractional_seconds() {
        assert_eq!(
            parse_expiry(Some("2026-11-01 08:00:00.500+00:00")).timestamp(),
            utc(2026, 11, 1, 8, 0, 0).timestamp()
        );
    }

    #[test]
    fn test_malformed_is_sentinel() {
        assert_eq!(parse_expiry(None), never_expires());
        assert_eq!(parse_expiry(Some("")), never_expires());
        assert_eq!(parse_expiry(Some("   ")), never_expires());
        assert_eq!(parse_expiry(Some("next tuesday")), never_expires());
        assert_eq!(parse_expiry(Some("2026-13-45T99:00:00Z")), never_expires());
        assert_eq!(parse_expiry(Some("20261101")), never_expires());
    }

    #[test]
    fn test_sentinel_value() {
        assert_eq!(never_expires(), utc(2030, 5, 19, 17, 24, 0));
    }
}
