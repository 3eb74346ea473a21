//! Wall-clock arithmetic for slot generation.
//!
//! Times of day are minutes since 00:00. Intervals are half-open
//! `[start, end)`: back-to-back intervals never overlap.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSlotError {
    InvalidFormat(String),
}

impl std::fmt::Display for TimeSlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeSlotError::InvalidFormat(s) => write!(f, "invalid time \"{s}\": expected HH:MM"),
        }
    }
}

impl std::error::Error for TimeSlotError {}

/// Parse `"HH:MM"` into minutes since midnight.
pub fn time_to_minutes(time: &str) -> Result<u32, TimeSlotError> {
    let invalid = || TimeSlotError::InvalidFormat(time.to_string());
    let (h, m) = time.trim().split_once(':').ok_or_else(invalid)?;
    let hours: u32 = h.parse().map_err(|_| invalid())?;
    let minutes: u32 = m.parse().map_err(|_| invalid())?;
    hours
        .checked_mul(60)
        .and_then(|h| h.checked_add(minutes))
        .ok_or_else(invalid)
}

/// Render minutes since midnight as zero-padded `"HH:MM"`.
///
/// Not range checked: 1470 renders as `"24:30"`. Callers keep values
/// inside one day.
pub fn minutes_to_time(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Half-open overlap test. `Span::overlaps` uses the same predicate on
/// UTC milliseconds.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && a_end > b_start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_times() {
        assert_eq!(time_to_minutes("00:00"), Ok(0));
        assert_eq!(time_to_minutes("08:30"), Ok(510));
        assert_eq!(time_to_minutes("8:05"), Ok(485));
        assert_eq!(time_to_minutes("24:00"), Ok(1440));
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "0800", "ab:cd", "08:", ":30", "08:30:00", "-1:00"] {
            assert!(
                matches!(time_to_minutes(bad), Err(TimeSlotError::InvalidFormat(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn render_times() {
        assert_eq!(minutes_to_time(0), "00:00");
        assert_eq!(minutes_to_time(510), "08:30");
        assert_eq!(minutes_to_time(1439), "23:59");
        // unchecked past midnight
        assert_eq!(minutes_to_time(1470), "24:30");
    }

    #[test]
    fn parse_render_agree() {
        for m in (0..1440).step_by(7) {
            assert_eq!(time_to_minutes(&minutes_to_time(m)), Ok(m));
        }
    }

    #[test]
    fn overlap_is_symmetric() {
        let points = [0u32, 30, 60, 90, 120];
        for &a0 in &points {
            for &a1 in points.iter().filter(|&&p| p > a0) {
                for &b0 in &points {
                    for &b1 in points.iter().filter(|&&p| p > b0) {
                        assert_eq!(
                            overlaps(a0, a1, b0, b1),
                            overlaps(b0, b1, a0, a1),
                            "[{a0},{a1}) vs [{b0},{b1})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn back_to_back_does_not_overlap() {
        for (t0, t1, t2) in [(0, 60, 120), (600, 660, 661), (0, 1, 2)] {
            assert!(!overlaps(t0, t1, t1, t2));
            assert!(!overlaps(t1, t2, t0, t1));
        }
    }

    #[test]
    fn overlap_cases() {
        assert!(overlaps(660, 720, 690, 750)); // partial
        assert!(overlaps(600, 900, 660, 720)); // containment
        assert!(overlaps(660, 720, 660, 720)); // identical
        assert!(!overlaps(660, 720, 780, 840)); // disjoint
    }
}
