use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::ApiError;

/// Shared secret expected as `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerToken {
    token: Arc<str>,
}

impl BearerToken {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self { token: token.into() }
    }

    /// Compare against an `Authorization` header value in time independent
    /// of the first mismatching byte.
    pub fn verify(&self, header: Option<&str>) -> bool {
        let Some(provided) = header.and_then(|h| h.strip_prefix("Bearer ")) else {
            return false;
        };
        let (a, b) = (provided.trim().as_bytes(), self.token.as_bytes());
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

/// Rejects requests without the configured bearer token.
pub async fn require_bearer_token(
    State(token): State<BearerToken>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if token.verify(header) {
        return Ok(next.run(request).await);
    }
    tracing::warn!(path = %request.uri().path(), "rejected request: missing or invalid bearer token");
    metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
    Err(ApiError::unauthorized())
}
