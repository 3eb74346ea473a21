use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::BookingStatus;
use crate::timezone::InvalidTimestamp;

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    InvalidTimestamp(String),
    ProfessionalNotFound(Ulid),
    NotFound(Ulid),
    /// Conflict Guard rejection: the interval overlaps an active booking.
    SlotUnavailable {
        conflicting_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    InvalidTransition {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    HasBookings(Ulid),
    LimitExceeded(&'static str),
    Persistence(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::InvalidTimestamp(msg) => write!(f, "invalid timestamp: {msg}"),
            EngineError::ProfessionalNotFound(id) => write!(f, "professional not found: {id}"),
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::SlotUnavailable { conflicting_id, start, end } => write!(
                f,
                "slot unavailable: overlaps booking {conflicting_id} [{}, {})",
                start.to_rfc3339(),
                end.to_rfc3339()
            ),
            EngineError::InvalidTransition { id, status, action } => {
                write!(f, "cannot {action} booking {id}: it is {}", status.as_str())
            }
            EngineError::HasBookings(id) => {
                write!(f, "cannot remove professional {id}: has bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Persistence(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidTimestamp> for EngineError {
    fn from(e: InvalidTimestamp) -> Self {
        EngineError::InvalidTimestamp(e.0)
    }
}
