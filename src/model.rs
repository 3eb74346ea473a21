use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;
use crate::timeslot::{self, minutes_to_time, time_to_minutes};

/// Unix milliseconds, UTC.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn from_instants(start: &DateTime<Utc>, end: &DateTime<Utc>) -> Self {
        Self::new(start.timestamp_millis(), end.timestamp_millis())
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        timeslot::overlaps(self.start, self.end, other.start, other.end)
    }
}

// ── Weekly work-hour template ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Sun => Weekday::Sunday,
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
        }
    }
}

/// Working window of one day, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkHours {
    pub start: u32,
    pub end: u32,
    /// Optional `[start, end)` break inside the window.
    pub break_window: Option<(u32, u32)>,
}

impl WorkHours {
    pub fn new(start: u32, end: u32, break_window: Option<(u32, u32)>) -> Result<Self, String> {
        if start >= end || end > MINUTES_PER_DAY {
            return Err(format!(
                "work window {}-{} must be non-empty and within one day",
                minutes_to_time(start),
                minutes_to_time(end)
            ));
        }
        if let Some((bs, be)) = break_window
            && (bs >= be || bs < start || be > end)
        {
            return Err(format!(
                "break {}-{} must be non-empty and inside {}-{}",
                minutes_to_time(bs),
                minutes_to_time(be),
                minutes_to_time(start),
                minutes_to_time(end)
            ));
        }
        Ok(Self { start, end, break_window })
    }
}

/// One weekday of the template. An inactive day contributes no slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDaySchedule", into = "RawDaySchedule")]
pub enum DaySchedule {
    Off,
    Working(WorkHours),
}

/// Wire shape of a day: `{active, start, end, break_start, break_end}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawDaySchedule {
    #[serde(alias = "ativo")]
    active: bool,
    #[serde(default, alias = "inicio")]
    start: Option<String>,
    #[serde(default, alias = "fim")]
    end: Option<String>,
    #[serde(default, alias = "intervalo_inicio")]
    break_start: Option<String>,
    #[serde(default, alias = "intervalo_fim")]
    break_end: Option<String>,
}

impl TryFrom<RawDaySchedule> for DaySchedule {
    type Error = String;

    fn try_from(raw: RawDaySchedule) -> Result<Self, Self::Error> {
        if !raw.active {
            return Ok(DaySchedule::Off);
        }
        let parse = |field: &str, v: Option<String>| -> Result<u32, String> {
            let v = v.ok_or_else(|| format!("active day requires \"{field}\""))?;
            time_to_minutes(&v).map_err(|e| e.to_string())
        };
        let start = parse("start", raw.start)?;
        let end = parse("end", raw.end)?;
        let break_window = match (raw.break_start, raw.break_end) {
            (None, None) => None,
            (Some(bs), Some(be)) => Some((
                time_to_minutes(&bs).map_err(|e| e.to_string())?,
                time_to_minutes(&be).map_err(|e| e.to_string())?,
            )),
            _ => return Err("break_start and break_end must be given together".into()),
        };
        WorkHours::new(start, end, break_window).map(DaySchedule::Working)
    }
}

impl From<DaySchedule> for RawDaySchedule {
    fn from(day: DaySchedule) -> Self {
        match day {
            DaySchedule::Off => RawDaySchedule::default(),
            DaySchedule::Working(h) => RawDaySchedule {
                active: true,
                start: Some(minutes_to_time(h.start)),
                end: Some(minutes_to_time(h.end)),
                break_start: h.break_window.map(|(s, _)| minutes_to_time(s)),
                break_end: h.break_window.map(|(_, e)| minutes_to_time(e)),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(alias = "dom")]
    pub sun: DaySchedule,
    #[serde(alias = "seg")]
    pub mon: DaySchedule,
    #[serde(alias = "ter")]
    pub tue: DaySchedule,
    #[serde(alias = "qua")]
    pub wed: DaySchedule,
    #[serde(alias = "qui")]
    pub thu: DaySchedule,
    #[serde(alias = "sex")]
    pub fri: DaySchedule,
    #[serde(alias = "sab")]
    pub sat: DaySchedule,
}

impl WeeklySchedule {
    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        match weekday {
            Weekday::Sunday => &self.sun,
            Weekday::Monday => &self.mon,
            Weekday::Tuesday => &self.tue,
            Weekday::Wednesday => &self.wed,
            Weekday::Thursday => &self.thu,
            Weekday::Friday => &self.fri,
            Weekday::Saturday => &self.sat,
        }
    }
}

impl Default for WeeklySchedule {
    /// Monday to Friday 08:00-18:00 with a 12:00-13:00 break.
    fn default() -> Self {
        let weekday = DaySchedule::Working(WorkHours {
            start: 8 * 60,
            end: 18 * 60,
            break_window: Some((12 * 60, 13 * 60)),
        });
        Self {
            sun: DaySchedule::Off,
            mon: weekday,
            tue: weekday,
            wed: weekday,
            thu: weekday,
            fri: weekday,
            sat: DaySchedule::Off,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Ulid,
    pub name: Option<String>,
    pub timezone: Tz,
    pub schedule: WeeklySchedule,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[serde(alias = "agendado")]
    Scheduled,
    #[serde(alias = "confirmado")]
    Confirmed,
    #[serde(alias = "cancelado")]
    Cancelled,
}

impl BookingStatus {
    /// Scheduled and confirmed bookings occupy their interval.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Scheduled | BookingStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub client_id: u64,
    pub company_id: u64,
    pub lead_id: String,
    pub professional_id: Ulid,
    pub product_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub discount: Decimal,
    pub status: BookingStatus,
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::from_instants(&self.start, &self.end)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn final_price(&self) -> Decimal {
        self.price - self.discount
    }
}

/// A professional plus its bookings, sorted by start.
#[derive(Debug, Clone)]
pub struct ProfessionalState {
    pub professional: Professional,
    pub bookings: Vec<Booking>,
}

impl ProfessionalState {
    pub fn new(professional: Professional) -> Self {
        Self {
            professional,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose interval overlaps `query`, any status.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let query = *query;
        let right_bound = self
            .bookings
            .partition_point(|b| b.start.timestamp_millis() < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end.timestamp_millis() > query.start)
    }

    /// Scheduled or confirmed bookings overlapping `query`.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.status.is_active())
    }
}

/// WAL record format. Each variant carries the professional it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalUpserted {
        professional: Professional,
    },
    ProfessionalRemoved {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    /// Full replacement. `previous_professional_id` differs from
    /// `booking.professional_id` when the booking moved.
    BookingUpdated {
        booking: Booking,
        previous_professional_id: Ulid,
    },
    BookingConfirmed {
        id: Ulid,
        professional_id: Ulid,
        at: DateTime<Utc>,
    },
    BookingCancelled {
        id: Ulid,
        professional_id: Ulid,
        at: DateTime<Utc>,
        reason: Option<String>,
    },
    BookingDeleted {
        id: Ulid,
        professional_id: Ulid,
    },
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn professional(id: Ulid) -> Professional {
        Professional {
            id,
            name: None,
            timezone: chrono_tz::UTC,
            schedule: WeeklySchedule::default(),
        }
    }

    pub fn booking(professional_id: Ulid, start_ms: Ms, end_ms: Ms, status: BookingStatus) -> Booking {
        let start = Utc.timestamp_millis_opt(start_ms).unwrap();
        let end = Utc.timestamp_millis_opt(end_ms).unwrap();
        Booking {
            id: Ulid::new(),
            client_id: 1,
            company_id: 1,
            lead_id: "lead-1".into(),
            professional_id,
            product_id: "prod-1".into(),
            start,
            end,
            price: Decimal::new(15000, 2),
            discount: Decimal::ZERO,
            status,
            confirmed: false,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            notes: None,
            internal_notes: None,
            created_at: start,
            updated_at: start,
        }
    }
}
