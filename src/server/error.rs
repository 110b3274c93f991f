//! Protocol error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::tree::path::PathParseError;

/// Errors surfaced directly as RPC status.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Stable status code name, carried in error bodies and stream errors.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::NotFound(_) => "NOT_FOUND",
            ProtocolError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ProtocolError::Unimplemented(_) => "UNIMPLEMENTED",
            ProtocolError::PermissionDenied(_) => "PERMISSION_DENIED",
            ProtocolError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::NotFound(_) => StatusCode::NOT_FOUND,
            ProtocolError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ProtocolError::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ProtocolError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ProtocolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<PathParseError> for ProtocolError {
    fn from(err: PathParseError) -> Self {
        match err {
            PathParseError::OriginNotSupported(_) => ProtocolError::Unimplemented(err.to_string()),
            _ => ProtocolError::InvalidArgument(err.to_string()),
        }
    }
}
