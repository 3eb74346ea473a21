use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{BookingFilter, BookingPatch, EngineError, NewBooking, slot_duration};
use crate::model::{Booking, BookingStatus};
use crate::timezone::{TimeZoneHint, normalize_to_utc};

use super::error::ApiError;
use super::extract::{Actor, ApiJson, ApiPath, ApiQuery, Tenant};
use super::{AppState, Envelope, ok};

/// A booking plus its derived fields.
#[derive(Debug, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub duration_minutes: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub final_price: Decimal,
}

impl From<Booking> for BookingView {
    fn from(booking: Booking) -> Self {
        Self {
            duration_minutes: booking.duration_minutes(),
            final_price: booking.final_price(),
            booking,
        }
    }
}

/// Fields clients may send back but never set: derived values and
/// lifecycle state owned by the confirm/cancel actions.
#[derive(Debug, Default, Deserialize)]
struct ReadOnlyFields {
    #[serde(default)]
    id: Option<IgnoredAny>,
    #[serde(default)]
    duration_minutes: Option<IgnoredAny>,
    #[serde(default)]
    final_price: Option<IgnoredAny>,
    #[serde(default)]
    status: Option<IgnoredAny>,
    #[serde(default)]
    confirmed: Option<IgnoredAny>,
    #[serde(default)]
    confirmed_at: Option<IgnoredAny>,
    #[serde(default)]
    cancelled_at: Option<IgnoredAny>,
    #[serde(default)]
    cancellation_reason: Option<IgnoredAny>,
    #[serde(default)]
    created_at: Option<IgnoredAny>,
    #[serde(default)]
    updated_at: Option<IgnoredAny>,
}

impl ReadOnlyFields {
    fn reject_present(&self) -> Result<(), ApiError> {
        let present = [
            ("id", self.id.is_some()),
            ("duration_minutes", self.duration_minutes.is_some()),
            ("final_price", self.final_price.is_some()),
            ("status", self.status.is_some()),
            ("confirmed", self.confirmed.is_some()),
            ("confirmed_at", self.confirmed_at.is_some()),
            ("cancelled_at", self.cancelled_at.is_some()),
            ("cancellation_reason", self.cancellation_reason.is_some()),
            ("created_at", self.created_at.is_some()),
            ("updated_at", self.updated_at.is_some()),
        ];
        match present.iter().find(|(_, set)| *set) {
            Some((field, _)) => Err(ApiError::validation(format!("{field} cannot be set directly"))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingBody {
    lead_id: String,
    professional_id: Ulid,
    product_id: String,
    start: String,
    end: String,
    #[serde(default)]
    timezone: Option<String>,
    price: Decimal,
    #[serde(default)]
    discount: Option<Decimal>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    internal_notes: Option<String>,
    #[serde(flatten)]
    read_only: ReadOnlyFields,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingBody {
    #[serde(default)]
    lead_id: Option<String>,
    #[serde(default)]
    professional_id: Option<Ulid>,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    discount: Option<Decimal>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    internal_notes: Option<String>,
    #[serde(flatten)]
    read_only: ReadOnlyFields,
}

#[derive(Debug, Default, Deserialize)]
struct CancelBody {
    #[serde(default, alias = "motivo")]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    professional_id: Ulid,
    date: NaiveDate,
    #[serde(default)]
    duration_minutes: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityView {
    professional_id: Ulid,
    date: NaiveDate,
    duration_minutes: u32,
    slots: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    status: Option<BookingStatus>,
    #[serde(default)]
    professional_id: Option<Ulid>,
    #[serde(default)]
    lead_id: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

pub async fn availability(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    ApiQuery(q): ApiQuery<AvailabilityQuery>,
) -> Result<Json<Envelope<AvailabilityView>>, ApiError> {
    let slots = match state.engine_for_read(scope)? {
        Some(engine) => engine
            .compute_available_slots(q.professional_id, q.date, q.duration_minutes)
            .await,
        None => slot_duration(q.duration_minutes)
            .and(Err(EngineError::ProfessionalNotFound(q.professional_id))),
    }
    .map_err(|e| state.engine_error(e))?;
    Ok(ok(AvailabilityView {
        professional_id: q.professional_id,
        date: q.date,
        duration_minutes: q.duration_minutes.unwrap_or(crate::limits::DEFAULT_SLOT_DURATION_MINUTES),
        slots,
    }))
}

pub async fn list(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> Result<Json<Envelope<Vec<BookingView>>>, ApiError> {
    let hint = TimeZoneHint::Named(state.default_timezone);
    let bound = |s: Option<String>| {
        s.map(|s| normalize_to_utc(&s, Some(&hint)))
            .transpose()
            .map_err(|e| state.engine_error(e.into()))
    };
    let filter = BookingFilter {
        status: q.status,
        professional_id: q.professional_id,
        lead_id: q.lead_id,
        from: bound(q.from)?,
        to: bound(q.to)?,
    };
    let bookings = match (state.engine_for_read(scope)?, filter.professional_id) {
        (Some(engine), _) => engine.list_bookings(&filter).await,
        (None, Some(pid)) => Err(EngineError::ProfessionalNotFound(pid)),
        (None, None) => Ok(Vec::new()),
    }
    .map_err(|e| state.engine_error(e))?;
    Ok(ok(bookings.into_iter().map(BookingView::from).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    ApiPath(id): ApiPath<Ulid>,
) -> Result<Json<Envelope<BookingView>>, ApiError> {
    let booking = match state.engine_for_read(scope)? {
        Some(engine) => engine.get_booking(id).await,
        None => Err(EngineError::NotFound(id)),
    }
    .map_err(|e| state.engine_error(e))?;
    Ok(ok(booking.into()))
}

pub async fn create(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    actor: Actor,
    ApiJson(body): ApiJson<CreateBookingBody>,
) -> Result<(StatusCode, Json<Envelope<BookingView>>), ApiError> {
    body.read_only.reject_present()?;
    let engine = state.engine_for_write(scope)?;
    let new = NewBooking {
        lead_id: body.lead_id,
        professional_id: body.professional_id,
        product_id: body.product_id,
        start: body.start,
        end: body.end,
        timezone: body.timezone,
        price: body.price,
        discount: body.discount,
        notes: body.notes,
        internal_notes: body.internal_notes,
    };
    let booking = engine
        .create_booking(new, actor.as_deref())
        .await
        .map_err(|e| state.engine_error(e))?;
    Ok((StatusCode::CREATED, ok(booking.into())))
}

pub async fn update(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    actor: Actor,
    ApiPath(id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<UpdateBookingBody>,
) -> Result<Json<Envelope<BookingView>>, ApiError> {
    body.read_only.reject_present()?;
    let engine = state.engine_for_write(scope)?;
    let patch = BookingPatch {
        lead_id: body.lead_id,
        professional_id: body.professional_id,
        product_id: body.product_id,
        start: body.start,
        end: body.end,
        timezone: body.timezone,
        price: body.price,
        discount: body.discount,
        notes: body.notes,
        internal_notes: body.internal_notes,
    };
    let booking = engine
        .update_booking(id, patch, actor.as_deref())
        .await
        .map_err(|e| state.engine_error(e))?;
    Ok(ok(booking.into()))
}

pub async fn confirm(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    actor: Actor,
    ApiPath(id): ApiPath<Ulid>,
) -> Result<Json<Envelope<BookingView>>, ApiError> {
    let engine = state.engine_for_write(scope)?;
    let booking = engine
        .confirm_booking(id, actor.as_deref())
        .await
        .map_err(|e| state.engine_error(e))?;
    Ok(ok(booking.into()))
}

/// The body is optional: `{}` or nothing cancels without a reason.
pub async fn cancel(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    actor: Actor,
    ApiPath(id): ApiPath<Ulid>,
    body: Bytes,
) -> Result<Json<Envelope<BookingView>>, ApiError> {
    let body: CancelBody = if body.iter().all(u8::is_ascii_whitespace) {
        CancelBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::validation(format!("invalid JSON body: {e}")))?
    };
    let engine = state.engine_for_write(scope)?;
    let booking = engine
        .cancel_booking(id, body.reason, actor.as_deref())
        .await
        .map_err(|e| state.engine_error(e))?;
    Ok(ok(booking.into()))
}

pub async fn delete(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    actor: Actor,
    ApiPath(id): ApiPath<Ulid>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    let engine = state.engine_for_write(scope)?;
    engine
        .delete_booking(id, actor.as_deref())
        .await
        .map_err(|e| state.engine_error(e))?;
    Ok(ok(serde_json::json!({ "id": id, "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields_rejected_in_create_body() {
        let body: CreateBookingBody = serde_json::from_str(
            r#"{
                "lead_id": "l", "professional_id": "01ARZ3NDEKTSV4RRFFQ69G5FAV",
                "product_id": "p", "start": "2024-03-04T10:00:00Z", "end": "2024-03-04T11:00:00Z",
                "price": "150.00", "final_price": 10
            }"#,
        )
        .unwrap();
        let err = body.read_only.reject_present().unwrap_err();
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert!(err.message.contains("final_price"));
    }

    #[test]
    fn update_body_accepts_plain_fields() {
        let body: UpdateBookingBody =
            serde_json::from_str(r#"{"notes": "bring exams", "price": 120.5}"#).unwrap();
        assert!(body.read_only.reject_present().is_ok());
        assert_eq!(body.price, Some(Decimal::new(1205, 1)));
    }

    #[test]
    fn update_body_rejects_status() {
        let body: UpdateBookingBody = serde_json::from_str(r#"{"status": "confirmed"}"#).unwrap();
        assert!(body.read_only.reject_present().is_err());
    }

    #[test]
    fn view_includes_derived_fields() {
        let mut b = crate::model::fixtures::booking(Ulid::new(), 0, 90 * 60_000, BookingStatus::Scheduled);
        b.discount = Decimal::new(5000, 2);
        let v = serde_json::to_value(BookingView::from(b)).unwrap();
        assert_eq!(v["duration_minutes"], 90);
        assert_eq!(v["final_price"], "100.00");
        assert_eq!(v["price"], "150.00");
        assert_eq!(v["status"], "scheduled");
    }
}
