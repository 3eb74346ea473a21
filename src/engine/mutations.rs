use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, oneshot};
use ulid::Ulid;

use crate::audit::AuditAction;
use crate::limits::*;
use crate::model::*;
use crate::timezone::{TimeZoneHint, normalize_to_utc};

use super::conflict::{check_no_conflict, now, validate_interval};
use super::{Engine, EngineError, WalCommand, apply_to_professional};

/// Input of `create_booking`. Timestamps are raw strings; offset-less ones
/// are read in `timezone` and rejected when it is absent.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub lead_id: String,
    pub professional_id: Ulid,
    pub product_id: String,
    pub start: String,
    pub end: String,
    pub timezone: Option<String>,
    pub price: Decimal,
    pub discount: Option<Decimal>,
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
}

/// Mutable fields of a booking. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub lead_id: Option<String>,
    pub professional_id: Option<Ulid>,
    pub product_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub timezone: Option<String>,
    pub price: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
}

fn validate_ref(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if value.len() > MAX_REF_LEN {
        return Err(EngineError::LimitExceeded("reference id too long"));
    }
    Ok(())
}

fn validate_notes(value: Option<&str>) -> Result<(), EngineError> {
    if value.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

fn validate_amounts(price: Decimal, discount: Decimal) -> Result<(), EngineError> {
    if price < Decimal::ZERO {
        return Err(EngineError::Validation("price must not be negative".into()));
    }
    if discount < Decimal::ZERO {
        return Err(EngineError::Validation("discount must not be negative".into()));
    }
    if discount > price {
        return Err(EngineError::Validation("discount must not exceed price".into()));
    }
    Ok(())
}

/// Parse the request's timezone hint. `None` means offset-less timestamps
/// are rejected.
fn resolve_hint(explicit: Option<&str>) -> Result<Option<TimeZoneHint>, EngineError> {
    explicit
        .map(|s| {
            s.parse::<TimeZoneHint>()
                .map_err(|_| EngineError::Validation(format!("unknown timezone: {s}")))
        })
        .transpose()
}

fn ensure_not_cancelled(booking: &Booking, action: &'static str) -> Result<(), EngineError> {
    if booking.status == BookingStatus::Cancelled {
        return Err(EngineError::InvalidTransition {
            id: booking.id,
            status: booking.status,
            action,
        });
    }
    Ok(())
}

/// Apply `patch` to a copy of `current`. Returns the new booking and the
/// names of the fields that actually changed.
fn patched(
    current: &Booking,
    patch: &BookingPatch,
    hint: Option<&TimeZoneHint>,
    at: DateTime<Utc>,
) -> Result<(Booking, Vec<&'static str>), EngineError> {
    ensure_not_cancelled(current, "update")?;
    let mut next = current.clone();
    let mut changed = Vec::new();

    if let Some(lead_id) = &patch.lead_id {
        validate_ref("lead_id", lead_id)?;
        if *lead_id != next.lead_id {
            next.lead_id = lead_id.clone();
            changed.push("lead_id");
        }
    }
    if let Some(product_id) = &patch.product_id {
        validate_ref("product_id", product_id)?;
        if *product_id != next.product_id {
            next.product_id = product_id.clone();
            changed.push("product_id");
        }
    }
    if let Some(pid) = patch.professional_id
        && pid != next.professional_id
    {
        next.professional_id = pid;
        changed.push("professional_id");
    }
    if let Some(start) = &patch.start {
        let start = normalize_to_utc(start, hint)?;
        if start != next.start {
            next.start = start;
            changed.push("start");
        }
    }
    if let Some(end) = &patch.end {
        let end = normalize_to_utc(end, hint)?;
        if end != next.end {
            next.end = end;
            changed.push("end");
        }
    }
    if let Some(price) = patch.price
        && price != next.price
    {
        next.price = price;
        changed.push("price");
    }
    if let Some(discount) = patch.discount
        && discount != next.discount
    {
        next.discount = discount;
        changed.push("discount");
    }
    if let Some(notes) = &patch.notes {
        validate_notes(Some(notes))?;
        if next.notes.as_ref() != Some(notes) {
            next.notes = Some(notes.clone());
            changed.push("notes");
        }
    }
    if let Some(notes) = &patch.internal_notes {
        validate_notes(Some(notes))?;
        if next.internal_notes.as_ref() != Some(notes) {
            next.internal_notes = Some(notes.clone());
            changed.push("internal_notes");
        }
    }

    validate_interval(&next.start, &next.end)?;
    validate_amounts(next.price, next.discount)?;
    if !changed.is_empty() {
        next.updated_at = at;
    }
    Ok((next, changed))
}

fn moves_in_time(changed: &[&str]) -> bool {
    changed
        .iter()
        .any(|f| matches!(*f, "start" | "end" | "professional_id"))
}

impl Engine {
    pub async fn create_booking(
        &self,
        new: NewBooking,
        actor: Option<&str>,
    ) -> Result<Booking, EngineError> {
        validate_ref("lead_id", &new.lead_id)?;
        validate_ref("product_id", &new.product_id)?;
        validate_notes(new.notes.as_deref())?;
        validate_notes(new.internal_notes.as_deref())?;
        let discount = new.discount.unwrap_or(Decimal::ZERO);
        validate_amounts(new.price, discount)?;

        let hint = resolve_hint(new.timezone.as_deref())?;
        let start = normalize_to_utc(&new.start, hint.as_ref())?;
        let end = normalize_to_utc(&new.end, hint.as_ref())?;
        let span = validate_interval(&start, &end)?;

        let professional_id = new.professional_id;
        let mut guard = self.lock_professional(professional_id).await?;

        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many bookings for professional"));
        }
        check_no_conflict(&guard, &span, None)?;

        let at = now();
        let booking = Booking {
            id: Ulid::new(),
            client_id: self.tenant().client_id,
            company_id: self.tenant().company_id,
            lead_id: new.lead_id,
            professional_id,
            product_id: new.product_id,
            start,
            end,
            price: new.price,
            discount,
            status: BookingStatus::Scheduled,
            confirmed: false,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            notes: new.notes,
            internal_notes: new.internal_notes,
            created_at: at,
            updated_at: at,
        };
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        self.emit_audit(AuditAction::BookingCreated, professional_id, Some(booking.id), Vec::new(), actor);
        Ok(booking)
    }

    /// Change a booking's mutable fields. A change of time or professional
    /// re-runs the conflict check, ignoring the booking itself.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
        actor: Option<&str>,
    ) -> Result<Booking, EngineError> {
        let target = patch.professional_id;
        let (current_pid, mut guard) = self.resolve_booking_write(id).await?;

        if target.is_none_or(|t| t == current_pid) {
            let hint = resolve_hint(patch.timezone.as_deref())?;
            let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
            let (next, changed) = patched(current, &patch, hint.as_ref(), now())?;
            if changed.is_empty() {
                return Ok(next);
            }
            if moves_in_time(&changed) {
                check_no_conflict(&guard, &next.span(), Some(id))?;
            }
            let event = Event::BookingUpdated {
                booking: next.clone(),
                previous_professional_id: current_pid,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            drop(guard);
            self.emit_audit(AuditAction::BookingUpdated, current_pid, Some(id), changed, actor);
            return Ok(next);
        }

        // Moving to another professional: release, then lock both in id order.
        let target_pid = target.ok_or(EngineError::NotFound(id))?;
        drop(guard);
        let (mut from, mut to) = self.lock_pair(current_pid, target_pid).await?;
        let current = from.booking(id).ok_or(EngineError::NotFound(id))?;
        let hint = resolve_hint(patch.timezone.as_deref())?;
        let (next, changed) = patched(current, &patch, hint.as_ref(), now())?;
        check_no_conflict(&to, &next.span(), Some(id))?;
        if to.bookings.len() >= MAX_BOOKINGS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many bookings for professional"));
        }

        let event = Event::BookingUpdated {
            booking: next.clone(),
            previous_professional_id: current_pid,
        };
        self.wal_append(&event).await?;
        apply_to_professional(&mut from, &event, &self.booking_index);
        apply_to_professional(&mut to, &event, &self.booking_index);
        drop((from, to));

        self.emit_audit(AuditAction::BookingUpdated, target_pid, Some(id), changed, actor);
        Ok(next)
    }

    /// Write-lock two distinct professionals in ULID order. Returned as
    /// `(first, second)` matching the argument order.
    async fn lock_pair(
        &self,
        first: Ulid,
        second: Ulid,
    ) -> Result<
        (
            OwnedRwLockWriteGuard<ProfessionalState>,
            OwnedRwLockWriteGuard<ProfessionalState>,
        ),
        EngineError,
    > {
        if first < second {
            let a = self.lock_professional(first).await?;
            let b = self.lock_professional(second).await?;
            Ok((a, b))
        } else {
            let b = self.lock_professional(second).await?;
            let a = self.lock_professional(first).await?;
            Ok((a, b))
        }
    }

    /// Marks the booking confirmed. Confirming again re-stamps `confirmed_at`.
    pub async fn confirm_booking(&self, id: Ulid, actor: Option<&str>) -> Result<Booking, EngineError> {
        let (professional_id, mut guard) = self.resolve_booking_write(id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        ensure_not_cancelled(current, "confirm")?;

        let event = Event::BookingConfirmed { id, professional_id, at: now() };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        drop(guard);

        self.emit_audit(
            AuditAction::BookingConfirmed,
            professional_id,
            Some(id),
            vec!["status", "confirmed", "confirmed_at"],
            actor,
        );
        Ok(booking)
    }

    /// Cancelled is terminal; the interval becomes free immediately.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        reason: Option<String>,
        actor: Option<&str>,
    ) -> Result<Booking, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }
        let (professional_id, mut guard) = self.resolve_booking_write(id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        ensure_not_cancelled(current, "cancel")?;

        let event = Event::BookingCancelled { id, professional_id, at: now(), reason };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        drop(guard);

        self.emit_audit(
            AuditAction::BookingCancelled,
            professional_id,
            Some(id),
            vec!["status", "cancelled_at", "cancellation_reason"],
            actor,
        );
        Ok(booking)
    }

    pub async fn delete_booking(&self, id: Ulid, actor: Option<&str>) -> Result<(), EngineError> {
        let (professional_id, mut guard) = self.resolve_booking_write(id).await?;
        let event = Event::BookingDeleted { id, professional_id };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        self.emit_audit(AuditAction::BookingDeleted, professional_id, Some(id), Vec::new(), actor);
        Ok(())
    }

    // ── Professional directory ───────────────────────────────

    /// Register a professional or replace its name, timezone and template.
    /// Existing bookings are kept as they are.
    pub async fn upsert_professional(
        &self,
        id: Ulid,
        name: Option<String>,
        timezone: Tz,
        schedule: WeeklySchedule,
        actor: Option<&str>,
    ) -> Result<Professional, EngineError> {
        if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("professional name too long"));
        }
        let professional = Professional { id, name, timezone, schedule };
        let event = Event::ProfessionalUpserted { professional: professional.clone() };

        let _directory = self.directory_lock.lock().await;
        if self.state.contains_key(&id) {
            let mut guard = self.lock_professional(id).await?;
            self.persist_and_apply(&mut guard, &event).await?;
        } else {
            if self.state.len() >= MAX_PROFESSIONALS_PER_TENANT {
                return Err(EngineError::LimitExceeded("too many professionals"));
            }
            self.wal_append(&event).await?;
            self.state
                .insert(id, Arc::new(RwLock::new(ProfessionalState::new(professional.clone()))));
        }

        self.emit_audit(
            AuditAction::ProfessionalUpserted,
            id,
            None,
            vec!["name", "timezone", "schedule"],
            actor,
        );
        Ok(professional)
    }

    /// Rejected with `HasBookings` while any booking, in any status,
    /// still references the professional.
    pub async fn remove_professional(&self, id: Ulid, actor: Option<&str>) -> Result<(), EngineError> {
        let _directory = self.directory_lock.lock().await;
        let guard = self.lock_professional(id).await?;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasBookings(id));
        }
        self.wal_append(&Event::ProfessionalRemoved { id }).await?;
        self.state.remove(&id);
        drop(guard);

        self.emit_audit(AuditAction::ProfessionalRemoved, id, None, Vec::new(), actor);
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as a minimal snapshot of the current state.
    ///
    /// Holds the directory lock and every professional's read lock while the
    /// snapshot is taken and written, so no write lands in the old log
    /// after it was captured.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _directory = self.directory_lock.lock().await;

        let mut shared: Vec<(Ulid, _)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        shared.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(shared.len());
        for (_, rs) in shared {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        for ps in &guards {
            events.push(Event::ProfessionalUpserted {
                professional: ps.professional.clone(),
            });
            for booking in &ps.bookings {
                events.push(Event::BookingCreated { booking: booking.clone() });
            }
        }
        let event_count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        drop(guards);

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!(tenant = %self.tenant(), events = event_count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
