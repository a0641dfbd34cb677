use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, dto::response::FailReason};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The connection is not authenticated or not allowed for this handler.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The identity lacks the permission required by the handler.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Wrong tournament password.
    #[error("incorrect password for {0}")]
    IncorrectPassword(String),
    /// Client speaks another protocol version.
    #[error("version mismatch: server expects {expected}, client sent {actual}")]
    VersionMismatch {
        /// Version this server speaks.
        expected: u32,
        /// Version the client announced.
        actual: u32,
    },
    /// Update raced with a removal of the same identity.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// Discovery could not complete before its deadline.
    #[error("discovery timed out after {0} ms")]
    DiscoveryTimeout(u64),
    /// No discovery peer answered.
    #[error("no mesh peer answered ({0} unreachable)")]
    PeersUnreachable(usize),
    /// Socket level failure, treated as a disconnect.
    #[error("transient io failure: {0}")]
    TransientIo(#[from] std::io::Error),
}

impl ServiceError {
    /// Reason code sent back in a Fail response.
    pub fn fail_reason(&self) -> FailReason {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Degraded => FailReason::StorageUnavailable,
            ServiceError::Unauthorized(_) => FailReason::Unauthorized,
            ServiceError::PermissionDenied(_) => FailReason::PermissionDenied,
            ServiceError::InvalidInput(_) => FailReason::InvalidInput,
            ServiceError::NotFound(_) => FailReason::NotFound,
            ServiceError::IncorrectPassword(_) => FailReason::IncorrectPassword,
            ServiceError::VersionMismatch { .. } => FailReason::IncorrectVersion,
            ServiceError::Conflict(_) => FailReason::Conflict,
            ServiceError::Timeout | ServiceError::DiscoveryTimeout(_) | ServiceError::PeersUnreachable(_) => {
                FailReason::Timeout
            }
            ServiceError::TransientIo(_) => FailReason::Internal,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Missing { .. } => ServiceError::Conflict(err.to_string()),
            StorageError::Unavailable { .. } => ServiceError::Unavailable(err),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Authenticated but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Payload larger than accepted.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::PermissionDenied(message) => AppError::Forbidden(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            err @ ServiceError::IncorrectPassword(_) => AppError::Forbidden(err.to_string()),
            err @ ServiceError::VersionMismatch { .. } => AppError::BadRequest(err.to_string()),
            ServiceError::Conflict(message) => AppError::Conflict(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
            err @ ServiceError::DiscoveryTimeout(_) => AppError::ServiceUnavailable(err.to_string()),
            ServiceError::TransientIo(source) => AppError::Internal(source.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
