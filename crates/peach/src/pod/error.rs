//! Pod provisioning error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for pod operations.
pub type PodResult<T> = Result<T, PodError>;

/// Errors that can occur while provisioning environment pods.
#[derive(Debug, Error)]
pub enum PodError {
    /// The orchestrator API rejected or failed a request.
    #[error("orchestrator {operation} failed: {message}")]
    Api { operation: String, message: String },

    /// The object already exists (HTTP 409 from the API server).
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// The pod did not get scheduled, or an old pod did not go away, in time.
    #[error("pod {name} not ready after {attempts} polls over {waited:?}")]
    ProvisioningTimeout {
        name: String,
        attempts: u32,
        waited: Duration,
    },

    /// The pod entered the failed phase.
    #[error("pod {name} failed: {reason}")]
    PodFailed { name: String, reason: String },

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Host-side data directory could not be prepared.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PodError {
    pub fn api(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Api {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api { .. })
    }
}
