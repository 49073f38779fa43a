//! API error rendering
//!
//! Every failure leaves the service as `{error, message, details}` with a
//! stable kind string. The HTTP status is derived from the kind, never
//! chosen ad hoc in a handler.

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::failover::{OpError, OpErrorKind};

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl From<&OpError> for ErrorBody {
    fn from(err: &OpError) -> Self {
        Self {
            error: err.kind.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

fn status_for(kind: OpErrorKind) -> StatusCode {
    match kind {
        OpErrorKind::InvalidTarget => StatusCode::BAD_REQUEST,
        OpErrorKind::Unreachable => StatusCode::BAD_GATEWAY,
        OpErrorKind::LagTooHigh => StatusCode::CONFLICT,
        OpErrorKind::Busy => StatusCode::CONFLICT,
        OpErrorKind::PromoteFailed => StatusCode::INTERNAL_SERVER_ERROR,
        OpErrorKind::DemoteFailed => StatusCode::INTERNAL_SERVER_ERROR,
        OpErrorKind::Deadline => StatusCode::GATEWAY_TIMEOUT,
        OpErrorKind::Duplicate => StatusCode::CONFLICT,
        OpErrorKind::NotFound => StatusCode::NOT_FOUND,
        OpErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render an operation error as its HTTP response.
pub fn error_response(err: &OpError) -> (StatusCode, Json<ErrorBody>) {
    (status_for(err.kind), Json(ErrorBody::from(err)))
}
