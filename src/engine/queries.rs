use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, RESOLVE_ATTEMPTS};

/// Listing filter. `from`/`to` bound the booking start, both inclusive.
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub professional_id: Option<Ulid>,
    pub lead_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl BookingFilter {
    fn matches(&self, b: &Booking) -> bool {
        self.status.is_none_or(|s| b.status == s)
            && self.lead_id.as_ref().is_none_or(|l| *l == b.lead_id)
            && self.from.is_none_or(|from| b.start >= from)
            && self.to.is_none_or(|to| b.start <= to)
    }
}

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        // A concurrent move can leave the index one step ahead of the lock.
        for _ in 0..RESOLVE_ATTEMPTS {
            let professional_id = self
                .professional_for_booking(&id)
                .ok_or(EngineError::NotFound(id))?;
            let Some(rs) = self.get_professional_state(&professional_id) else {
                continue;
            };
            let guard = rs.read().await;
            if let Some(b) = guard.booking(id) {
                return Ok(b.clone());
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// Matching bookings, most recent start first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        let targets: Vec<_> = match filter.professional_id {
            Some(pid) => vec![
                self.get_professional_state(&pid)
                    .ok_or(EngineError::ProfessionalNotFound(pid))?,
            ],
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for rs in targets {
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        out.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }

    pub async fn get_professional(&self, id: Ulid) -> Result<Professional, EngineError> {
        let rs = self
            .get_professional_state(&id)
            .ok_or(EngineError::ProfessionalNotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.professional.clone())
    }

    /// All registered professionals, ordered by id.
    pub async fn list_professionals(&self) -> Vec<Professional> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for rs in shared {
            out.push(rs.read().await.professional.clone());
        }
        out.sort_by_key(|p| p.id);
        out
    }
}
