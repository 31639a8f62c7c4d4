//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::environment::EnvironmentError;
use crate::pod::PodError;
use crate::relay::RelayError;
use crate::terminal::TerminalError;
use crate::workspace::WorkspaceError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Provisioning timed out: {0}")]
    ProvisioningTimeout(String),

    #[error("Terminal init failed: {0}")]
    TerminalInit(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Provisioning(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProvisioningTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::TerminalInit(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::Provisioning(_) => "PROVISIONING_FAILED",
            Self::ProvisioningTimeout(_) => "GATEWAY_TIMEOUT",
            Self::TerminalInit(_) => "TERMINAL_INIT_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) | ApiError::TerminalInit(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::Provisioning(msg) | ApiError::ProvisioningTimeout(msg) => {
                warn!(error_code = code, message = %msg, "Provisioning error");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

impl From<PodError> for ApiError {
    fn from(err: PodError) -> Self {
        match err {
            PodError::ProvisioningTimeout { .. } => Self::ProvisioningTimeout(err.to_string()),
            PodError::InvalidInput(msg) => Self::BadRequest(msg),
            other => Self::Provisioning(other.to_string()),
        }
    }
}

impl From<EnvironmentError> for ApiError {
    fn from(err: EnvironmentError) -> Self {
        match err {
            EnvironmentError::NotFound(what) => Self::NotFound(what),
            EnvironmentError::Forbidden { .. } => Self::Forbidden(err.to_string()),
            EnvironmentError::InvalidFile { .. } => Self::Internal(err.to_string()),
            EnvironmentError::NotProvisioned(_) => Self::Conflict(err.to_string()),
            // Handlers answer this one with a 200 signal before conversion.
            EnvironmentError::GroupRequired { .. } => Self::Forbidden(err.to_string()),
            EnvironmentError::Provisioning(pod) => pod.into(),
            EnvironmentError::Internal(e) => e.into(),
        }
    }
}

impl From<TerminalError> for ApiError {
    fn from(err: TerminalError) -> Self {
        match err {
            TerminalError::NotProvisioned(_) => Self::Conflict(err.to_string()),
            other => Self::TerminalInit(other.to_string()),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidTarget(msg) => Self::BadRequest(msg),
            other => Self::Provisioning(other.to_string()),
        }
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::NotFound(path) => Self::NotFound(path),
            WorkspaceError::AlreadyExists(path) => Self::BadRequest(format!("{} already exists", path)),
            WorkspaceError::PathTraversal | WorkspaceError::InvalidPath(_) => {
                Self::BadRequest(err.to_string())
            }
            WorkspaceError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_server_fault() {
            ApiError::Internal(format!("Authentication error: {}", err))
        } else {
            ApiError::Unauthorized(err.to_string())
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
