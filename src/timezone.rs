use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Formats accepted for timestamps without an explicit offset.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTimestamp(pub String);

impl std::fmt::Display for InvalidTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvalidTimestamp {}

/// Timezone used to interpret a timestamp that carries no offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZoneHint {
    Named(Tz),
    Fixed(FixedOffset),
}

impl std::str::FromStr for TimeZoneHint {
    type Err = InvalidTimestamp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(tz) = s.parse::<Tz>() {
            return Ok(TimeZoneHint::Named(tz));
        }
        parse_fixed_offset(s)
            .map(TimeZoneHint::Fixed)
            .ok_or_else(|| InvalidTimestamp(format!("unknown timezone: {s}")))
    }
}

impl TimeZoneHint {
    fn localize(&self, naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            TimeZoneHint::Named(tz) => tz
                .from_local_datetime(naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
            TimeZoneHint::Fixed(offset) => offset
                .from_local_datetime(naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

fn parse_fixed_offset(s: &str) -> Option<FixedOffset> {
    if s.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, s.get(1..)?),
        b'-' => (-1, s.get(1..)?),
        _ => return None,
    };
    let (h, m) = rest.split_once(':')?;
    let h: i32 = h.parse().ok()?;
    let m: i32 = m.parse().ok()?;
    if !(0..=23).contains(&h) || !(0..=59).contains(&m) {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}

fn parse_with_offset(input: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(input)
        .or_else(|_| DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M%:z"))
        .ok()
}

fn parse_naive(input: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
}

/// True if `input` is an ISO 8601 date-time, with or without offset.
pub fn is_valid_iso(input: &str) -> bool {
    let input = input.trim();
    !input.is_empty() && (parse_with_offset(input).is_some() || parse_naive(input).is_some())
}

/// Normalize an ISO 8601 timestamp to UTC.
///
/// An explicit offset always wins. Without one, the local time is read in
/// `hint`; with no hint the timestamp is rejected. Local times that are
/// skipped or repeated by a DST change are rejected as ambiguous.
pub fn normalize_to_utc(
    input: &str,
    hint: Option<&TimeZoneHint>,
) -> Result<DateTime<Utc>, InvalidTimestamp> {
    let input = input.trim();
    if let Some(dt) = parse_with_offset(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = parse_naive(input).ok_or_else(|| {
        InvalidTimestamp(format!(
            "\"{input}\" is not an ISO 8601 date-time (e.g. 2025-11-28T08:00:00-03:00)"
        ))
    })?;
    let hint = hint.ok_or_else(|| {
        InvalidTimestamp(format!(
            "\"{input}\" has no timezone offset and no timezone was supplied"
        ))
    })?;
    hint.localize(&naive).ok_or_else(|| {
        InvalidTimestamp(format!("\"{input}\" is ambiguous or does not exist in {hint:?}"))
    })
}
