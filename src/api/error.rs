use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::engine::EngineError;

const GENERIC_PERSISTENCE_MESSAGE: &str = "the booking store is temporarily unavailable";

/// Error leaving the HTTP boundary as `{success: false, error: {code, message}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid bearer token",
        )
    }

    /// Map an engine error. Persistence details stay in the log unless
    /// `expose_internal` is set.
    pub fn from_engine(e: EngineError, expose_internal: bool) -> Self {
        let message = e.to_string();
        match e {
            EngineError::Validation(_) => Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
            EngineError::InvalidTimestamp(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_TIMESTAMP", message)
            }
            EngineError::LimitExceeded(_) => Self::new(StatusCode::BAD_REQUEST, "LIMIT_EXCEEDED", message),
            EngineError::ProfessionalNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "PROFESSIONAL_NOT_FOUND", message)
            }
            EngineError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            EngineError::SlotUnavailable { .. } => Self::new(StatusCode::CONFLICT, "SLOT_UNAVAILABLE", message),
            EngineError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message)
            }
            EngineError::HasBookings(_) => Self::new(StatusCode::CONFLICT, "HAS_BOOKINGS", message),
            EngineError::Persistence(_) => {
                tracing::error!("persistence failure: {message}");
                let shown = if expose_internal { message } else { GENERIC_PERSISTENCE_MESSAGE.into() };
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR", shown)
            }
        }
    }

    /// Tenant engine could not be loaded (WAL unreadable, too many tenants).
    pub fn tenant_unavailable(e: std::io::Error, expose_internal: bool) -> Self {
        if e.kind() == std::io::ErrorKind::InvalidInput {
            return Self::validation(e.to_string());
        }
        Self::from_engine(EngineError::Persistence(e.to_string()), expose_internal)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn engine_errors_map_to_codes() {
        let cases = [
            (EngineError::Validation("x".into()), 400, "VALIDATION_ERROR"),
            (EngineError::InvalidTimestamp("x".into()), 400, "INVALID_TIMESTAMP"),
            (EngineError::LimitExceeded("x"), 400, "LIMIT_EXCEEDED"),
            (EngineError::ProfessionalNotFound(Ulid::new()), 404, "PROFESSIONAL_NOT_FOUND"),
            (EngineError::NotFound(Ulid::new()), 404, "NOT_FOUND"),
            (EngineError::HasBookings(Ulid::new()), 409, "HAS_BOOKINGS"),
            (EngineError::Persistence("disk full".into()), 500, "PERSISTENCE_ERROR"),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from_engine(err, false);
            assert_eq!(api.status.as_u16(), status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn persistence_detail_hidden_unless_exposed() {
        let hidden = ApiError::from_engine(EngineError::Persistence("disk full".into()), false);
        assert!(!hidden.message.contains("disk full"));
        let shown = ApiError::from_engine(EngineError::Persistence("disk full".into()), true);
        assert!(shown.message.contains("disk full"));
    }
}
