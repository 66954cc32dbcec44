//! HTTP error mapping.
//!
//! Core errors carry a category and a reason; this module translates
//! them into status codes and a stable JSON error envelope. Exactly one
//! log line per terminal error, emitted here at the boundary.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use opsdeck_engine::EngineError;

/// JSON error envelope: `{"error": {"category": ..., "reason": ...}}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    category: String,
    reason: String,
}

/// An error ready to leave the process.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub category: String,
    pub reason: String,
    /// Seconds for the Retry-After header on 503s.
    pub retry_after: Option<u64>,
}

impl ApiError {
    /// A 400 with a custom category.
    #[must_use]
    pub fn bad_request(category: &str, reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            category: category.to_string(),
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// A 404.
    #[must_use]
    pub fn not_found(category: &str, reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            category: category.to_string(),
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// The 503 for a saturated executor pool.
    #[must_use]
    pub fn saturated() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            category: "capacity".to_string(),
            reason: "executor pool saturated, retry later".to_string(),
            retry_after: Some(5),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::UnknownTool { .. } => StatusCode::NOT_FOUND,
            EngineError::NoViableMethod { .. }
            | EngineError::DepCycle { .. }
            | EngineError::UnknownRemediation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::PoolSaturated => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            category: err.category().to_string(),
            reason: err.to_string(),
            retry_after: matches!(err, EngineError::PoolSaturated).then_some(5),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("request failed ({}): {}", self.category, self.reason);
        let body = Json(ErrorBody {
            error: ErrorDetail {
                category: self.category,
                reason: self.reason,
            },
        });
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
