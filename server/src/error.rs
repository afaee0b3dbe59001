//! Errors that end a whole sync request.
//!
//! Per-item problems never land here: they travel back as `REJECTED` item
//! results. An `AppError` means the batch as a whole was not processed, so
//! the client keeps every item queued.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("ledger error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("batch of {size} exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("no entity {0}")]
    EntityNotFound(String),

    #[error("ledger inconsistent: {0}")]
    Inconsistent(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::EntityNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Migrate(_) | AppError::Inconsistent(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Migrate(_) => "LEDGER_UNAVAILABLE",
            AppError::BatchTooLarge { .. } => "BATCH_TOO_LARGE",
            AppError::EntityNotFound(_) => "ENTITY_NOT_FOUND",
            AppError::Inconsistent(_) => "LEDGER_INCONSISTENT",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = if status.is_server_error() {
            // Internals stay in the log
            tracing::error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            tracing::debug!("Request refused: {}", self);
            self.to_string()
        };

        let body = Json(ErrorBody {
            code: self.code(),
            error,
        });
        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
