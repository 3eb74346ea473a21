use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Check ordering and bounds of a booking interval and turn it into a `Span`.
pub(crate) fn validate_interval(start: &DateTime<Utc>, end: &DateTime<Utc>) -> Result<Span, EngineError> {
    let (s, e) = (start.timestamp_millis(), end.timestamp_millis());
    if s < MIN_VALID_TIMESTAMP_MS || e > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if e <= s {
        return Err(EngineError::Validation("end must be after start".into()));
    }
    let span = Span::new(s, e);
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking longer than 24 hours"));
    }
    Ok(span)
}

/// The first scheduled or confirmed booking overlapping `span`, other than
/// `exclude`, rejects the write.
pub(crate) fn check_no_conflict(
    ps: &ProfessionalState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match ps
        .active_overlapping(span)
        .find(|b| Some(b.id) != exclude)
    {
        Some(b) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::SlotUnavailable {
                conflicting_id: b.id,
                start: b.start,
                end: b.end,
            })
        }
        None => Ok(()),
    }
}

impl Engine {
    /// Whether `[start, end)` is free for the professional. Advisory: only a
    /// write re-checks under the professional's write lock.
    pub async fn is_available(
        &self,
        professional_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_booking_id: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = validate_interval(&start, &end)?;
        let rs = self
            .get_professional_state(&professional_id)
            .ok_or(EngineError::ProfessionalNotFound(professional_id))?;
        let guard = rs.read().await;
        Ok(check_no_conflict(&guard, &span, exclude_booking_id).is_ok())
    }
}
