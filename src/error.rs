use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::storage::StoreError;

/// Every failure a request can end in. Each kind has a fixed status and message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Student already exists")]
    DuplicateEmail,

    /// Same message for unknown email and wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token is not valid")]
    Unauthenticated,

    #[error("Student not found")]
    StudentNotFound,

    #[error("Email already in use")]
    EmailInUse,

    #[error("{0}")]
    Validation(String),

    /// The cause is logged, never returned to the client.
    #[error("Server error")]
    Server(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::DuplicateEmail => "DuplicateEmail",
            AppError::InvalidCredentials => "InvalidCredentials",
            AppError::Unauthenticated => "Unauthenticated",
            AppError::StudentNotFound => "StudentNotFound",
            AppError::EmailInUse => "EmailInUse",
            AppError::Validation(_) => "ValidationError",
            AppError::Server(_) => "ServerError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DuplicateEmail
            | AppError::InvalidCredentials
            | AppError::EmailInUse
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::StudentNotFound => StatusCode::NOT_FOUND,
            AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::StudentNotFound,
            other => AppError::Server(other.to_string()),
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Server(format!("password hashing failed: {}", err))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Server(cause) = &self {
            error!(%cause, "request failed");
        }

        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::DuplicateEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidCredentials.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::StudentNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Server("disk".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        assert!(matches!(AppError::from(StoreError::NotFound), AppError::StudentNotFound));
        assert!(matches!(
            AppError::from(StoreError::Corrupt("bad id".into())),
            AppError::Server(_)
        ));
    }

    #[test]
    fn test_server_error_hides_cause() {
        let err = AppError::Server("sled io error at /var/data".into());
        assert_eq!(err.to_string(), "Server error");
    }
}
