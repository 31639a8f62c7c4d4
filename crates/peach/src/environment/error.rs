//! Environment registry error types.

use thiserror::Error;

use crate::pod::PodError;

/// Result type for environment operations.
pub type EnvironmentResult<T> = Result<T, EnvironmentError>;

/// Errors that can occur while resolving or mutating environments.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// Course, assignment or environment does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The course requires groups and the caller has none.
    #[error("course {course_id} requires a group")]
    GroupRequired { course_id: String },

    /// The caller does not own the environment.
    #[error("user {user_id} may not access environment {environment_id}")]
    Forbidden {
        environment_id: String,
        user_id: String,
    },

    /// An attached file could not be written into the workspace.
    #[error("invalid file {name}: {reason}")]
    InvalidFile { name: String, reason: String },

    /// The environment has no pod address yet.
    #[error("environment {0} is not provisioned")]
    NotProvisioned(String),

    /// Pod provisioning failed.
    #[error(transparent)]
    Provisioning(#[from] PodError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EnvironmentError {
    pub(crate) fn invalid_file(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFile {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
