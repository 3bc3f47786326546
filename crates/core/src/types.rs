use chrono::FixedOffset;

/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Workflow timezone. Datetime values render and compare in this offset.
pub type TimeZone = FixedOffset;

/// Offset used when `ONTASK_TIME_ZONE` is not configured.
pub const DEFAULT_TIME_ZONE: &str = "+00:00";

/// Parse a `+HH:MM` / `-HH:MM` offset (or `Z` / `UTC`).
pub fn parse_time_zone(text: &str) -> Option<TimeZone> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("z") || text.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// The UTC offset.
pub fn utc() -> TimeZone {
    FixedOffset::east_opt(0).expect("zero offset is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signed_offsets() {
        assert_eq!(parse_time_zone("+10:30").unwrap().local_minus_utc(), 37_800);
        assert_eq!(parse_time_zone("-0500").unwrap().local_minus_utc(), -18_000);
        assert_eq!(parse_time_zone("UTC").unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_time_zone("Australia/Sydney").is_none());
        assert!(parse_time_zone("+25:00").is_none());
        assert!(parse_time_zone("").is_none());
    }
}
