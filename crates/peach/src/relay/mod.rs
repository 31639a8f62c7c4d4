//! WebSocket relay between browsers and environment pods.
//!
//! A relay session owns one inbound browser socket and one outbound pod
//! socket and forwards data frames between them until either side goes away.

mod bridge;
mod error;

pub use bridge::relay;
pub use error::RelayError;

use serde::{Deserialize, Serialize};

use crate::pod::WorkspaceTemplate;

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Seconds to wait for the pod-side WebSocket handshake.
    pub connect_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

/// Relay session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Bridging,
    Closed,
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayState::Connecting => write!(f, "connecting"),
            RelayState::Bridging => write!(f, "bridging"),
            RelayState::Closed => write!(f, "closed"),
        }
    }
}

/// How a bridged session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The browser closed or disconnected.
    ClientClosed,
    /// The pod closed, with its close code if it sent one.
    PodClosed { code: Option<u16>, reason: String },
    /// Server shutdown.
    Cancelled,
    ClientError(String),
    PodError(String),
}

impl std::fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayOutcome::ClientClosed => write!(f, "client closed"),
            RelayOutcome::PodClosed {
                code: Some(code),
                reason,
            } => write!(f, "pod closed ({} {})", code, reason),
            RelayOutcome::PodClosed { code: None, .. } => write!(f, "pod closed"),
            RelayOutcome::Cancelled => write!(f, "cancelled"),
            RelayOutcome::ClientError(e) => write!(f, "client error: {}", e),
            RelayOutcome::PodError(e) => write!(f, "pod error: {}", e),
        }
    }
}

/// Pod-side endpoint of a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayChannel {
    /// File synchronization on the file-sync port; binary frames.
    FileSync { path: String },
    /// An initialized terminal on the terminal port; text frames.
    Terminal { pid: String },
}

impl RelayChannel {
    pub fn name(&self) -> &'static str {
        match self {
            RelayChannel::FileSync { .. } => "file-sync",
            RelayChannel::Terminal { .. } => "terminal",
        }
    }

    /// WebSocket URL of this channel on the pod at `address`.
    pub fn pod_url(&self, address: &str, template: &WorkspaceTemplate) -> Result<String, RelayError> {
        match self {
            RelayChannel::FileSync { path } => {
                let mut encoded = Vec::new();
                for segment in path.split('/').filter(|s| !s.is_empty()) {
                    if segment == ".." {
                        return Err(RelayError::InvalidTarget(format!(
                            "file path escapes the workspace: {}",
                            path
                        )));
                    }
                    encoded.push(urlencoding::encode(segment).into_owned());
                }
                Ok(format!(
                    "ws://{}:{}/{}",
                    address,
                    template.file_port,
                    encoded.join("/")
                ))
            }
            RelayChannel::Terminal { pid } => {
                if pid.is_empty() || !pid.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(RelayError::InvalidTarget(format!(
                        "invalid terminal id: {}",
                        pid
                    )));
                }
                Ok(format!(
                    "ws://{}:{}/?pid={}",
                    address, template.terminal_port, pid
                ))
            }
        }
    }
}
