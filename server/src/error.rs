/// Error types for the admission server.
/// Every handler failure funnels through `AppError`, which renders the
/// `{"error": "..."}` body the frontend expects.
use crate::db::StorageError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired code")]
    InvalidOrExpiredCode,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Access denied")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Only image formats are allowed (JPG, PNG, GIF, WebP)")]
    UnsupportedFormat,

    #[error("File exceeds the {limit_mb} MB upload limit")]
    FileTooLarge { limit_mb: usize },

    #[error("{0}")]
    Conflict(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Build a validation error naming every missing field.
    pub fn missing_fields(fields: &[&str]) -> Self {
        AppError::Validation(format!("Missing required fields: {}", fields.join(", ")))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::DuplicateEmail
            | AppError::InvalidOrExpiredCode
            | AppError::UnsupportedFormat
            | AppError::FileTooLarge { .. } => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials | AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status.is_server_error() {
            log::error!("Request failed: {}", self);
            match self {
                AppError::Upstream(_) => "Upstream service unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        HttpResponse::build(status).json(json!({ "error": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_missing_fields_lists_every_field() {
        let err = AppError::missing_fields(&["courseId", "email"]);
        assert_eq!(err.to_string(), "Missing required fields: courseId, email");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::NotFound("Application".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::FileTooLarge { limit_mb: 10 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Conflict("closed".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[actix_web::test]
    async fn test_server_errors_hide_details() {
        let resp = AppError::Internal("disk on fire".into()).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Internal server error"));
        assert!(!text.contains("disk on fire"));
    }

    #[actix_web::test]
    async fn test_client_errors_expose_message() {
        let resp = AppError::InvalidOrExpiredCode.error_response();
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Invalid or expired code");
    }
}
