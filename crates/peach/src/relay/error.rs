//! Relay error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that end a relay session before it starts bridging.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The pod-side WebSocket could not be opened.
    #[error("connecting to {url} failed: {message}")]
    Connect { url: String, message: String },

    /// The pod-side WebSocket did not answer in time.
    #[error("connecting to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    /// The requested pod endpoint is malformed.
    #[error("invalid relay target: {0}")]
    InvalidTarget(String),
}
