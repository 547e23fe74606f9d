//! HTTP error responses.
//!
//! Bridges [`RegistrationError`] to axum responses. Every error body is
//! `{"code": "...", "message": "..."}`: clients branch on `code` and show `message`.

use crate::error::RegistrationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error type for handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach an internal error for logging; it never reaches the client.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST".to_string())
    }

    /// 401 Unauthorized
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHORIZED".to_string())
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

/// Status for each rejection.
///
/// `AlreadyRegistered` answers 404 because existing clients depend on it.
#[must_use]
pub const fn status_for(error: &RegistrationError) -> StatusCode {
    match error {
        RegistrationError::AlreadyRegistered
        | RegistrationError::NotWaitlisted
        | RegistrationError::NotRegistered
        | RegistrationError::EventNotFound => StatusCode::NOT_FOUND,
        RegistrationError::RegistrationClosed(_) => StatusCode::FORBIDDEN,
        RegistrationError::EventFull
        | RegistrationError::EventNotFull
        | RegistrationError::AlreadyWaitlisted
        | RegistrationError::IdempotencyConflict { .. }
        | RegistrationError::SettlementInProgress
        | RegistrationError::PaymentNotDue => StatusCode::CONFLICT,
        RegistrationError::RefundWindowClosed { .. } => StatusCode::BAD_REQUEST,
        RegistrationError::InsufficientWalletBalance { .. } | RegistrationError::PaymentFailed { .. } => {
            StatusCode::PAYMENT_REQUIRED
        },
        RegistrationError::InvalidEvent(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RegistrationError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<RegistrationError> for AppError {
    fn from(error: RegistrationError) -> Self {
        Self::new(status_for(&error), error.to_string(), error.code().to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                ),
                None => tracing::warn!(status = %self.status, code = %self.code, "Request failed"),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
