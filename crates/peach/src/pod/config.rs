//! Orchestrator configuration as read from the config file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DEFAULT_NAME_PREFIX, PodError, PodResult, ProvisionerConfig, WorkspaceTemplate, validate_prefix};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Namespace holding every environment pod.
    pub namespace: String,
    /// Use the service account mounted into the pod instead of kubeconfig.
    pub in_cluster: bool,
    /// Prefix of derived pod and service names.
    pub name_prefix: String,
    pub provision_timeout_secs: u64,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    /// Attempts per API call on transient failures.
    pub api_retries: u32,
    pub template: WorkspaceTemplate,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            in_cluster: false,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            provision_timeout_secs: 120,
            poll_initial_ms: 250,
            poll_max_ms: 5000,
            api_retries: 3,
            template: WorkspaceTemplate::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate and convert into provisioner settings rooted at `data_root`.
    pub fn provisioner_config(&self, data_root: PathBuf) -> PodResult<ProvisionerConfig> {
        validate_prefix(&self.name_prefix).map_err(PodError::InvalidInput)?;
        if self.provision_timeout_secs == 0 {
            return Err(PodError::InvalidInput(
                "provision_timeout_secs must be positive".to_string(),
            ));
        }
        if self.poll_initial_ms == 0 || self.poll_max_ms < self.poll_initial_ms {
            return Err(PodError::InvalidInput(format!(
                "invalid poll interval {}ms..{}ms",
                self.poll_initial_ms, self.poll_max_ms
            )));
        }

        Ok(ProvisionerConfig {
            name_prefix: self.name_prefix.clone(),
            data_root,
            template: self.template.clone(),
            provision_timeout: Duration::from_secs(self.provision_timeout_secs),
            poll_initial: Duration::from_millis(self.poll_initial_ms),
            poll_max: Duration::from_millis(self.poll_max_ms),
            api_retries: self.api_retries.max(1),
        })
    }
}
