mod bookings;
mod error;
mod extract;
mod professionals;

pub use error::ApiError;
pub use extract::{ACTOR_HEADER, CLIENT_ID_HEADER, COMPANY_ID_HEADER};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch};
use axum::{Json, Router};
use chrono_tz::Tz;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::auth::{BearerToken, require_bearer_token};
use crate::engine::{Engine, EngineError};
use crate::tenant::{TenantManager, TenantScope};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
    /// Zone for professionals registered without one and for list bounds
    /// given without an offset.
    pub default_timezone: Tz,
    pub expose_internal_errors: bool,
}

impl AppState {
    pub fn engine_error(&self, e: EngineError) -> ApiError {
        ApiError::from_engine(e, self.expose_internal_errors)
    }

    /// Engine of a tenant that has data, or `None`. Reads never create a
    /// tenant. They retry the load once; writes never retry.
    fn engine_for_read(&self, scope: TenantScope) -> Result<Option<Arc<Engine>>, ApiError> {
        self.tenants
            .get_existing(scope)
            .or_else(|e| {
                tracing::warn!(%scope, "tenant load failed, retrying: {e}");
                self.tenants.get_existing(scope)
            })
            .map_err(|e| ApiError::tenant_unavailable(e, self.expose_internal_errors))
    }

    fn engine_for_write(&self, scope: TenantScope) -> Result<Arc<Engine>, ApiError> {
        self.tenants
            .get_or_create(scope)
            .map_err(|e| ApiError::tenant_unavailable(e, self.expose_internal_errors))
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    success: bool,
    data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data })
}

async fn health() -> Json<Envelope<serde_json::Value>> {
    ok(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Records request count and latency per matched route.
async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "method" => method.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        crate::observability::HTTP_REQUEST_DURATION_SECONDS,
        "route" => route,
        "method" => method
    )
    .record(start.elapsed().as_secs_f64());
    response
}

/// `/health` plus the `/api/v1` booking and directory routes. With a token,
/// every `/api/v1` route requires it.
pub fn router(state: AppState, api_token: Option<BearerToken>) -> Router {
    let mut api = Router::new()
        .route("/bookings", get(bookings::list).post(bookings::create))
        .route("/bookings/availability", get(bookings::availability))
        .route(
            "/bookings/:id",
            get(bookings::get).patch(bookings::update).delete(bookings::delete),
        )
        .route("/bookings/:id/confirm", patch(bookings::confirm))
        .route("/bookings/:id/cancel", patch(bookings::cancel))
        .route("/professionals", get(professionals::list))
        .route(
            "/professionals/:id",
            get(professionals::get)
                .put(professionals::upsert)
                .delete(professionals::remove),
        );
    if let Some(token) = api_token {
        api = api.layer(middleware::from_fn_with_state(token, require_bearer_token));
    }

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
