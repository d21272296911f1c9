//! Conversion of failures into HTTP responses.
//!
//! ## Status codes
//! - `400 Bad Request`: [`shardline::Error::InvalidRequest`] or a body that is
//!   not the expected JSON.
//! - `404 Not Found`: [`shardline::Error::NotFound`]. The worker should
//!   allocate again.
//! - `500 Internal Server Error`: broken registry invariants and anything
//!   else the core reports.
//!
//! Every error body is `{"error": "<message>"}`.

use crate::server::telemetry::increment_request_errors;
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<shardline::Error> for ApiError {
    fn from(err: shardline::Error) -> Self {
        let status = match &err {
            shardline::Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            shardline::Error::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if err.is_fatal() {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "Orchestrator invariant violated");
        }

        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        increment_request_errors(self.status.as_u16());
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}
