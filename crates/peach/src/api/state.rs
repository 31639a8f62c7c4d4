//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthState;
use crate::environment::EnvironmentService;
use crate::pod::WorkspaceTemplate;
use crate::relay::RelayConfig;
use crate::terminal::TerminalClient;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Environment registry.
    pub environments: Arc<EnvironmentService>,
    /// Pod-side terminal service client.
    pub terminal: TerminalClient,
    /// Relay settings.
    pub relay: RelayConfig,
    /// Authentication state.
    pub auth: AuthState,
    /// Cancelled on shutdown; every relay session holds a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        environments: Arc<EnvironmentService>,
        terminal: TerminalClient,
        relay: RelayConfig,
        auth: AuthState,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            environments,
            terminal,
            relay,
            auth,
            shutdown,
        }
    }

    pub fn template(&self) -> &WorkspaceTemplate {
        &self.environments.provisioner().config().template
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.connect_timeout_secs)
    }
}
