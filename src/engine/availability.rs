use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::timeslot::{minutes_to_time, overlaps};

use super::{Engine, EngineError};

/// Open slot start times inside `hours`, stepping by `SLOT_STRIDE_MINUTES`.
///
/// `busy` holds occupied `[start, end)` ranges in minutes since local
/// midnight of the same day; ranges may extend past either end of the day.
/// A candidate is dropped if it overlaps the break or any busy range.
pub fn available_slots(hours: &WorkHours, duration: u32, busy: &[(i64, i64)]) -> Vec<String> {
    let mut slots = Vec::new();
    if duration == 0 {
        return slots;
    }
    let mut offset = hours.start;
    while offset + duration <= hours.end {
        let end = offset + duration;
        let in_break = hours
            .break_window
            .is_some_and(|(bs, be)| overlaps(offset, end, bs, be));
        let taken = busy
            .iter()
            .any(|&(bs, be)| overlaps(i64::from(offset), i64::from(end), bs, be));
        if !in_break && !taken {
            slots.push(minutes_to_time(offset));
        }
        offset += SLOT_STRIDE_MINUTES;
    }
    slots
}

/// Requested slot length, or the default when absent.
pub fn slot_duration(requested: Option<u32>) -> Result<u32, EngineError> {
    let duration = requested.unwrap_or(DEFAULT_SLOT_DURATION_MINUTES);
    if duration == 0 || duration > MINUTES_PER_DAY {
        return Err(EngineError::Validation(format!(
            "duration_minutes must be between 1 and {MINUTES_PER_DAY}"
        )));
    }
    Ok(duration)
}

/// First instant of `date` in `tz`. When midnight falls in a DST gap the
/// day starts an hour later.
fn local_midnight(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>, EngineError> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| EngineError::Validation(format!("no local midnight on {date}")))
}

/// Wall-clock minutes between local midnight of `date` and `instant`.
fn local_minutes(instant: &DateTime<Utc>, tz: Tz, date: NaiveDate) -> i64 {
    let local = instant.with_timezone(&tz).naive_local();
    (local - date.and_time(NaiveTime::MIN)).num_minutes()
}

impl Engine {
    /// Start times on `date` where a `duration_minutes` appointment fits the
    /// professional's template and does not touch an active booking.
    ///
    /// Advisory only: the slot may be taken before the caller books it.
    pub async fn compute_available_slots(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
        duration_minutes: Option<u32>,
    ) -> Result<Vec<String>, EngineError> {
        let duration = slot_duration(duration_minutes)?;

        let rs = self
            .get_professional_state(&professional_id)
            .ok_or(EngineError::ProfessionalNotFound(professional_id))?;
        let guard = rs.read().await;
        let tz = guard.professional.timezone;

        let hours = match guard.professional.schedule.day(date.weekday().into()) {
            DaySchedule::Off => return Ok(Vec::new()),
            DaySchedule::Working(hours) => *hours,
        };

        let next_day = date
            .succ_opt()
            .ok_or_else(|| EngineError::Validation(format!("date out of range: {date}")))?;
        let day = Span::from_instants(&local_midnight(tz, date)?, &local_midnight(tz, next_day)?);

        let busy: Vec<(i64, i64)> = guard
            .active_overlapping(&day)
            .map(|b| (local_minutes(&b.start, tz, date), local_minutes(&b.end, tz, date)))
            .collect();

        Ok(available_slots(&hours, duration, &busy))
    }
}
