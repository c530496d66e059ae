//! Application error taxonomy.
//!
//! Every fallible operation in the core reports one of these variants
//! synchronously to the caller. Handlers return `Result<_, AppError>` and
//! axum renders the variant as an HTTP status with a JSON `{"error": ...}`
//! body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// No session or an invalid/expired token.
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated but not authorized for the target conversation/group action.
    #[error("{0}")]
    Forbidden(&'static str),

    /// Group/user/message id does not resolve.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Malformed input or references to unknown entities.
    #[error("{0}")]
    Validation(String),

    /// Semantically disallowed transition (admin leaving, removing the admin).
    #[error("{0}")]
    InvalidOperation(&'static str),

    /// Duplicate state change (e.g. adding an existing member).
    #[error("{0}")]
    Conflict(&'static str),

    /// Persistence or infrastructure failure; the operation is not committed.
    #[error("internal server error")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "internal error");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Internal(format!("sqlite: {e}"))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("blocking task: {e}"))
    }
}
