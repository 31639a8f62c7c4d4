//! Live relay session tracking.

use std::sync::Arc;

use dashmap::DashMap;

/// Counts open relay sessions per environment.
///
/// The reaper never idles an environment that still has a live session,
/// however old its activity timestamp is.
#[derive(Debug, Clone, Default)]
pub struct ActivityTracker {
    sessions: Arc<DashMap<String, usize>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. The returned guard unregisters it when dropped.
    pub fn begin(&self, environment_id: &str) -> SessionGuard {
        *self
            .sessions
            .entry(environment_id.to_string())
            .or_insert(0) += 1;
        SessionGuard {
            sessions: self.sessions.clone(),
            environment_id: environment_id.to_string(),
        }
    }

    pub fn live_sessions(&self, environment_id: &str) -> usize {
        self.sessions
            .get(environment_id)
            .map(|count| *count)
            .unwrap_or(0)
    }
}

/// Guard for one live relay session.
#[derive(Debug)]
pub struct SessionGuard {
    sessions: Arc<DashMap<String, usize>>,
    environment_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions
            .remove_if_mut(&self.environment_id, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
    }
}
