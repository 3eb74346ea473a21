use axum::Json;
use axum::extract::State;
use chrono_tz::Tz;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{Professional, WeeklySchedule};

use super::error::ApiError;
use super::extract::{Actor, ApiJson, ApiPath, Tenant};
use super::{AppState, Envelope, ok};

/// Missing fields fall back to the clinic timezone and the default template.
#[derive(Debug, Deserialize)]
pub struct UpsertProfessionalBody {
    #[serde(default, alias = "nome")]
    name: Option<String>,
    #[serde(default)]
    timezone: Option<Tz>,
    #[serde(default, alias = "horarios")]
    schedule: Option<WeeklySchedule>,
}

pub async fn upsert(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    actor: Actor,
    ApiPath(id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<UpsertProfessionalBody>,
) -> Result<Json<Envelope<Professional>>, ApiError> {
    let engine = state.engine_for_write(scope)?;
    let professional = engine
        .upsert_professional(
            id,
            body.name,
            body.timezone.unwrap_or(state.default_timezone),
            body.schedule.unwrap_or_default(),
            actor.as_deref(),
        )
        .await
        .map_err(|e| state.engine_error(e))?;
    Ok(ok(professional))
}

pub async fn get(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    ApiPath(id): ApiPath<Ulid>,
) -> Result<Json<Envelope<Professional>>, ApiError> {
    let professional = match state.engine_for_read(scope)? {
        Some(engine) => engine.get_professional(id).await,
        None => Err(EngineError::ProfessionalNotFound(id)),
    }
    .map_err(|e| state.engine_error(e))?;
    Ok(ok(professional))
}

pub async fn list(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
) -> Result<Json<Envelope<Vec<Professional>>>, ApiError> {
    let professionals = match state.engine_for_read(scope)? {
        Some(engine) => engine.list_professionals().await,
        None => Vec::new(),
    };
    Ok(ok(professionals))
}

pub async fn remove(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    actor: Actor,
    ApiPath(id): ApiPath<Ulid>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    let engine = state.engine_for_write(scope)?;
    engine
        .remove_professional(id, actor.as_deref())
        .await
        .map_err(|e| state.engine_error(e))?;
    Ok(ok(serde_json::json!({ "id": id, "deleted": true })))
}
