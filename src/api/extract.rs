use async_trait::async_trait;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::limits::MAX_ACTOR_LEN;
use crate::tenant::TenantScope;

use super::error::ApiError;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const COMPANY_ID_HEADER: &str = "x-company-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

/// JSON body whose rejections use the API error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Tenant scope from `x-client-id` / `x-company-id`. Both are required.
pub struct Tenant(pub TenantScope);

fn positive_id(headers: &HeaderMap, name: &str) -> Result<u64, ApiError> {
    let raw = headers
        .get(name)
        .ok_or_else(|| ApiError::validation(format!("missing {name} header")))?;
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::validation(format!("{name} must be a positive integer")))
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let client_id = positive_id(&parts.headers, CLIENT_ID_HEADER)?;
        let company_id = positive_id(&parts.headers, COMPANY_ID_HEADER)?;
        Ok(Tenant(TenantScope::new(client_id, company_id)))
    }
}

/// Optional `x-actor-id`, recorded on audit records.
pub struct Actor(pub Option<String>);

impl Actor {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(ACTOR_HEADER) else {
            return Ok(Actor(None));
        };
        let actor = raw
            .to_str()
            .map_err(|_| ApiError::validation(format!("{ACTOR_HEADER} must be visible ASCII")))?
            .trim();
        if actor.len() > MAX_ACTOR_LEN {
            return Err(ApiError::validation(format!("{ACTOR_HEADER} too long")));
        }
        Ok(Actor((!actor.is_empty()).then(|| actor.to_owned())))
    }
}
