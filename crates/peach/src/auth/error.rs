//! Authentication errors.

use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::api::ApiError;

/// Why a request could not be attributed to a user.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer header, `auth_token` cookie, `token` query or dev header.
    #[error("no credentials supplied")]
    MissingCredentials,

    #[error("malformed authorization header")]
    MalformedAuthorization,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    #[error("unknown dev user '{0}'")]
    UnknownDevUser(String),

    /// Production mode without a usable signing secret.
    #[error("no JWT secret configured")]
    NoSigningKey,

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl AuthError {
    /// Failures caused by server configuration rather than the caller.
    pub fn is_server_fault(&self) -> bool {
        matches!(self, Self::NoSigningKey | Self::Encoding(_))
    }
}

// Rejections use the same JSON body as every other API error.
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
