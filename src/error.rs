//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] crate::domain::DomainError),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Map Postgres serialization/deadlock failures onto the retryable
    /// domain error so callers see one taxonomy.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if let Some(code) = db_err.code() {
                // 40001 serialization_failure, 40P01 deadlock_detected
                if code == "40001" || code == "40P01" {
                    return AppError::Domain(crate::domain::DomainError::ConcurrencyConflict);
                }
            }
        }
        AppError::Database(err)
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use crate::domain::DomainError;

        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => {
                let status = match domain_err {
                    DomainError::Unauthorized => StatusCode::UNAUTHORIZED,
                    DomainError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                    DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
                    DomainError::ConcurrencyConflict => StatusCode::CONFLICT,
                    DomainError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                    DomainError::DoubleEntryImbalance { .. }
                    | DomainError::PeriodStateViolation(_)
                    | DomainError::HierarchyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    DomainError::Validation(_) => StatusCode::BAD_REQUEST,
                };
                (status, domain_err.code(), Some(domain_err.to_string()))
            }

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;

    #[test]
    fn test_domain_error_codes_pass_through() {
        let err = AppError::Domain(DomainError::PermissionDenied {
            permission: "journal.approve".to_string(),
        });
        match err {
            AppError::Domain(d) => assert_eq!(d.code(), "permission_denied"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_missing_header_message() {
        let err = AppError::MissingHeader("X-Request-User-Id".to_string());
        assert!(err.to_string().contains("X-Request-User-Id"));
    }
}
