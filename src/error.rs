use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

/// Domain error taxonomy, opaque to transport until mapped at the HTTP edge.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("channel mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: String, got: String },
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("missing variable: {0}")]
    MissingVariable(String),
    #[error("frozen variable missing: {0}")]
    FrozenVariableMissing(String),
    #[error("missing manual variable {1} on item {0}")]
    MissingManual(String, String),
    #[error("formula not found: {0}")]
    FormulaNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    fn status(&self) -> StatusCode {
        match self {
            EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) | EngineError::FormulaNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ChannelMismatch { .. } => StatusCode::BAD_REQUEST,
            EngineError::ValidationError(_)
            | EngineError::MissingVariable(_)
            | EngineError::FrozenVariableMissing(_)
            | EngineError::MissingManual(_, _) => StatusCode::BAD_REQUEST,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    message: String,
    error: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        if matches!(self, EngineError::Internal(_)) {
            tracing::error!("internal error: {self}");
        }
        let status = self.status();
        let body = ErrorEnvelope {
            success: false,
            message: self.to_string(),
            error: error_kind(&self).to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn error_kind(e: &EngineError) -> &'static str {
    match e {
        EngineError::Unauthenticated => "Unauthenticated",
        EngineError::Forbidden(_) => "Forbidden",
        EngineError::NotFound(_) => "NotFound",
        EngineError::ChannelMismatch { .. } => "ChannelMismatch",
        EngineError::ValidationError(_) => "ValidationError",
        EngineError::MissingVariable(_) => "MissingVariable",
        EngineError::FrozenVariableMissing(_) => "FrozenVariableMissing",
        EngineError::MissingManual(_, _) => "MissingManual",
        EngineError::FormulaNotFound(_) => "FormulaNotFound",
        EngineError::Conflict(_) => "Conflict",
        EngineError::Internal(_) => "Internal",
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::ValidationError(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
