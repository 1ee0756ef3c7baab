use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to API callers.
#[derive(Error, Debug)]
pub enum AppError {
    /// Search engine, LLM provider or mailbox unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Malformed product payload, bad query or unsupported image
    #[error("Validation error: {0}")]
    Validation(String),

    /// The vision model could not produce a product record
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// Bad mailbox credentials or API key
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A required setting is missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ExtractionFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::ExtractionFailure(_) => "EXTRACTION_FAILURE",
            AppError::Authentication(_) => "AUTHENTICATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error_code = code, status = status.as_u16(), %message, "Request failed");
        } else {
            tracing::warn!(error_code = code, status = status.as_u16(), %message, "Request rejected");
        }

        let body = Json(json!({
            "status": "error",
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            AppError::ServiceUnavailable(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<tantivy::TantivyError> for AppError {
    fn from(err: tantivy::TantivyError) -> Self {
        AppError::Internal(format!("index error: {err}"))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("background task failed: {err}"))
    }
}
