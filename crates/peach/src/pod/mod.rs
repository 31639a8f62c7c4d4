//! Environment pod provisioning.
//!
//! Each environment gets one workspace pod plus a ClusterIP service of the
//! same name. Names are derived from the environment id, so provisioning is
//! idempotent: calling [`PodProvisioner::ensure_pod`] again for the same id
//! reuses whatever already exists and repairs whatever is missing.

mod config;
mod error;
mod kubernetes;
mod manifest;
mod naming;

pub use config::OrchestratorConfig;
pub use error::{PodError, PodResult};
pub use kubernetes::KubeOrchestrator;
pub use manifest::{APP_LABEL, INSTANCE_LABEL, WorkspaceTemplate};
pub use naming::{DEFAULT_NAME_PREFIX, NAME_HASH_LEN, derive_pod_name, validate_prefix};

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use log::{debug, info, warn};
use tokio::time::Instant;

const PHASE_PENDING: &str = "Pending";
const PHASE_FAILED: &str = "Failed";
/// Reported for pods that have a deletion timestamp.
pub(crate) const PHASE_TERMINATING: &str = "Terminating";

/// Orchestrator abstraction for testability.
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    /// Current phase of a pod, `None` if it does not exist.
    async fn pod_phase(&self, name: &str) -> PodResult<Option<String>>;
    /// Submit a pod. Returns [`PodError::AlreadyExists`] on conflict.
    async fn create_pod(&self, pod: &Pod) -> PodResult<()>;
    /// Delete a pod. Missing pods are not an error.
    async fn delete_pod(&self, name: &str) -> PodResult<()>;
    async fn service_exists(&self, name: &str) -> PodResult<bool>;
    /// Submit a service. Returns [`PodError::AlreadyExists`] on conflict.
    async fn create_service(&self, service: &Service) -> PodResult<()>;
    /// Delete a service. Missing services are not an error.
    async fn delete_service(&self, name: &str) -> PodResult<()>;
}

/// Provisioner configuration.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Prefix of every derived pod/service name.
    pub name_prefix: String,
    /// Host-side directory holding one subdirectory per environment.
    pub data_root: PathBuf,
    /// Pod and service template.
    pub template: WorkspaceTemplate,
    /// Maximum time to wait for a pod to leave the pending phase.
    pub provision_timeout: Duration,
    /// First delay between pod status polls.
    pub poll_initial: Duration,
    /// Upper bound of the poll delay.
    pub poll_max: Duration,
    /// Attempts per orchestrator call before a transient error surfaces.
    pub api_retries: u32,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            data_root: PathBuf::from("./data"),
            template: WorkspaceTemplate::default(),
            provision_timeout: Duration::from_secs(120),
            poll_initial: Duration::from_millis(250),
            poll_max: Duration::from_secs(5),
            api_retries: 3,
        }
    }
}

/// Creates and reuses environment pods.
#[derive(Clone)]
pub struct PodProvisioner {
    orchestrator: Arc<dyn OrchestratorApi>,
    config: ProvisionerConfig,
}

impl PodProvisioner {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>, config: ProvisionerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Name of the pod and service for an environment.
    pub fn pod_name(&self, environment_id: &str) -> String {
        derive_pod_name(&self.config.name_prefix, environment_id)
    }

    /// Host-side data directory of an environment.
    pub fn data_dir(&self, environment_id: &str) -> PodResult<PathBuf> {
        validate_environment_id(environment_id)?;
        Ok(self.config.data_root.join(environment_id))
    }

    /// Ensure the pod and service for an environment exist and return the
    /// service name used to address it.
    ///
    /// A pod that is still terminating, or a failed pod this call deletes,
    /// is waited out before the replacement is submitted. The whole call is
    /// bounded by the provisioning timeout.
    pub async fn ensure_pod(&self, environment_id: &str) -> PodResult<String> {
        let data_dir = self.data_dir(environment_id)?;
        let name = self.pod_name(environment_id);
        let start = Instant::now();

        tokio::fs::create_dir_all(&data_dir).await?;

        let phase = self
            .retrying("read pod", || self.orchestrator.pod_phase(&name))
            .await?;

        match phase.as_deref() {
            None => self.create_pod(&name, environment_id, false).await?,
            Some(PHASE_TERMINATING) => {
                info!("Pod {} is terminating; waiting before recreating", name);
                self.wait_until_gone(&name, start).await?;
                self.create_pod(&name, environment_id, true).await?;
            }
            Some(PHASE_FAILED) => {
                warn!("Pod {} is in Failed phase; recreating", name);
                self.retrying("delete pod", || self.orchestrator.delete_pod(&name))
                    .await?;
                self.wait_until_gone(&name, start).await?;
                self.create_pod(&name, environment_id, true).await?;
            }
            Some(phase) => debug!("Reusing pod {} (phase {})", name, phase),
        }

        let phase = self.wait_until_scheduled(&name, start).await?;
        self.ensure_service(&name).await?;

        info!(
            "Environment {} provisioned as {} (phase {})",
            environment_id, name, phase
        );
        Ok(name)
    }

    /// Delete the service and pod of an environment.
    pub async fn reclaim(&self, environment_id: &str) -> PodResult<()> {
        validate_environment_id(environment_id)?;
        let name = self.pod_name(environment_id);

        self.retrying("delete service", || self.orchestrator.delete_service(&name))
            .await?;
        self.retrying("delete pod", || self.orchestrator.delete_pod(&name))
            .await?;

        info!("Reclaimed pod {} of environment {}", name, environment_id);
        Ok(())
    }

    /// Submit the pod. `replacing` is set when an old pod of the same name
    /// was just waited out; a conflict then means the name was taken again
    /// by someone else and the pod is not ours to reuse.
    async fn create_pod(
        &self,
        name: &str,
        environment_id: &str,
        replacing: bool,
    ) -> PodResult<()> {
        let pod = self.config.template.pod(name, environment_id);
        match self
            .retrying("create pod", || self.orchestrator.create_pod(&pod))
            .await
        {
            Ok(()) => {
                debug!("Submitted pod {}", name);
                Ok(())
            }
            Err(PodError::AlreadyExists { .. }) if !replacing => {
                debug!("Pod {} was created concurrently", name);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn ensure_service(&self, name: &str) -> PodResult<()> {
        let exists = self
            .retrying("read service", || self.orchestrator.service_exists(name))
            .await?;
        if exists {
            return Ok(());
        }

        let service = self.config.template.service(name);
        match self
            .retrying("create service", || self.orchestrator.create_service(&service))
            .await
        {
            Ok(()) | Err(PodError::AlreadyExists { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Poll until the pod leaves the pending phase.
    async fn wait_until_scheduled(&self, name: &str, start: Instant) -> PodResult<String> {
        self.poll(name, start, "pending", |phase| match phase {
            Some(PHASE_FAILED) => Some(Err(PodError::PodFailed {
                name: name.to_string(),
                reason: "pod entered Failed phase".to_string(),
            })),
            Some(PHASE_TERMINATING) => Some(Err(PodError::PodFailed {
                name: name.to_string(),
                reason: "pod was deleted while starting".to_string(),
            })),
            Some(PHASE_PENDING) | None => None,
            Some(other) => Some(Ok(other.to_string())),
        })
        .await
    }

    /// Poll until the pod no longer exists.
    async fn wait_until_gone(&self, name: &str, start: Instant) -> PodResult<()> {
        self.poll(name, start, "terminating", |phase| phase.is_none().then_some(Ok(())))
            .await
    }

    /// Read the pod phase with exponential backoff until `settled` yields a
    /// result or the provisioning timeout, counted from `start`, runs out.
    async fn poll<T, F>(
        &self,
        name: &str,
        start: Instant,
        waiting_for: &str,
        mut settled: F,
    ) -> PodResult<T>
    where
        F: FnMut(Option<&str>) -> Option<PodResult<T>>,
    {
        let timeout = self.config.provision_timeout;
        let mut delay = self.config.poll_initial;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let phase = self
                .retrying("read pod", || self.orchestrator.pod_phase(name))
                .await?;
            if let Some(result) = settled(phase.as_deref()) {
                return result;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(PodError::ProvisioningTimeout {
                    name: name.to_string(),
                    attempts,
                    waited: elapsed,
                });
            }

            debug!(
                "Pod {} still {} (attempt {}); retrying in {:?}",
                name, waiting_for, attempts, delay
            );
            tokio::time::sleep(delay.min(timeout - elapsed)).await;
            delay = (delay * 2).min(self.config.poll_max);
        }
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, mut call: F) -> PodResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PodResult<T>>,
    {
        let max_attempts = self.config.api_retries.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match call().await {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let backoff = self.config.poll_initial * attempt;
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempt, max_attempts, err, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }
}

/// Environment ids double as directory names and volume subpaths.
fn validate_environment_id(environment_id: &str) -> PodResult<()> {
    if environment_id.is_empty() {
        return Err(PodError::InvalidInput(
            "environment id cannot be empty".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !environment_id.chars().all(valid_chars) {
        return Err(PodError::InvalidInput(format!(
            "environment id '{}' contains invalid characters",
            environment_id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeOrchestrator {
        pods: Mutex<HashMap<String, String>>,
        services: Mutex<HashSet<String>>,
        pod_creates: AtomicUsize,
        pod_deletes: AtomicUsize,
        service_creates: AtomicUsize,
        /// Number of status reads that still report Pending after creation.
        pending_reads: AtomicUsize,
        /// Number of service creations that fail before one succeeds.
        service_failures: AtomicUsize,
        /// Pod creations rejected with a conflict although the name is free.
        create_conflicts: AtomicUsize,
        never_schedule: bool,
        /// Status reads a deleted pod keeps reporting Terminating.
        graceful_reads: usize,
        terminating: Mutex<HashMap<String, usize>>,
    }

    impl FakeOrchestrator {
        fn phase(&self, name: &str) -> Option<String> {
            self.pods.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl OrchestratorApi for FakeOrchestrator {
        async fn pod_phase(&self, name: &str) -> PodResult<Option<String>> {
            {
                let mut terminating = self.terminating.lock().unwrap();
                if let Some(left) = terminating.get_mut(name) {
                    if *left > 0 {
                        *left -= 1;
                        return Ok(Some(PHASE_TERMINATING.to_string()));
                    }
                    terminating.remove(name);
                    self.pods.lock().unwrap().remove(name);
                    return Ok(None);
                }
            }
            let mut pods = self.pods.lock().unwrap();
            let Some(phase) = pods.get_mut(name) else {
                return Ok(None);
            };
            if phase == PHASE_PENDING && !self.never_schedule {
                let remaining = self.pending_reads.load(Ordering::SeqCst);
                if remaining == 0 {
                    *phase = "Running".to_string();
                } else {
                    self.pending_reads.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Ok(Some(phase.clone()))
        }

        async fn create_pod(&self, pod: &Pod) -> PodResult<()> {
            let name = pod.metadata.name.clone().unwrap();
            let conflict = self
                .create_conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let mut pods = self.pods.lock().unwrap();
            if conflict || pods.contains_key(&name) {
                return Err(PodError::AlreadyExists { kind: "pod", name });
            }
            self.pod_creates.fetch_add(1, Ordering::SeqCst);
            pods.insert(name, PHASE_PENDING.to_string());
            Ok(())
        }

        async fn delete_pod(&self, name: &str) -> PodResult<()> {
            self.pod_deletes.fetch_add(1, Ordering::SeqCst);
            let mut terminating = self.terminating.lock().unwrap();
            let mut pods = self.pods.lock().unwrap();
            if self.graceful_reads == 0 {
                pods.remove(name);
            } else if pods.contains_key(name) {
                terminating
                    .entry(name.to_string())
                    .or_insert(self.graceful_reads);
            }
            Ok(())
        }

        async fn service_exists(&self, name: &str) -> PodResult<bool> {
            Ok(self.services.lock().unwrap().contains(name))
        }

        async fn create_service(&self, service: &Service) -> PodResult<()> {
            if self
                .service_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PodError::api("create service", "connection reset"));
            }
            self.service_creates.fetch_add(1, Ordering::SeqCst);
            let name = service.metadata.name.clone().unwrap();
            self.services.lock().unwrap().insert(name);
            Ok(())
        }

        async fn delete_service(&self, name: &str) -> PodResult<()> {
            self.services.lock().unwrap().remove(name);
            Ok(())
        }
    }

    fn test_config(data_root: &std::path::Path) -> ProvisionerConfig {
        ProvisionerConfig {
            data_root: data_root.to_path_buf(),
            provision_timeout: Duration::from_millis(300),
            poll_initial: Duration::from_millis(5),
            poll_max: Duration::from_millis(40),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ensure_pod_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator::default());
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        let first = provisioner.ensure_pod("env-1").await.unwrap();
        let second = provisioner.ensure_pod("env-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, derive_pod_name(DEFAULT_NAME_PREFIX, "env-1"));
        assert_eq!(fake.pod_creates.load(Ordering::SeqCst), 1);
        assert_eq!(fake.service_creates.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("env-1").is_dir());
    }

    #[tokio::test]
    async fn test_ensure_pod_waits_for_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator {
            pending_reads: AtomicUsize::new(3),
            ..Default::default()
        });
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        provisioner.ensure_pod("env-2").await.unwrap();
        assert_eq!(fake.pending_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ensure_pod_times_out_when_pending_forever() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator {
            never_schedule: true,
            ..Default::default()
        });
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        let err = provisioner.ensure_pod("env-3").await.unwrap_err();
        assert!(matches!(err, PodError::ProvisioningTimeout { .. }));
        // No service is created for a pod that never got scheduled.
        assert_eq!(fake.service_creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_pod_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator::default());
        let name = derive_pod_name(DEFAULT_NAME_PREFIX, "env-4");
        fake.pods
            .lock()
            .unwrap()
            .insert(name.clone(), PHASE_FAILED.to_string());
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        assert_eq!(provisioner.ensure_pod("env-4").await.unwrap(), name);
        assert_eq!(fake.pod_deletes.load(Ordering::SeqCst), 1);
        assert_eq!(fake.pod_creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_pod_waits_for_graceful_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator {
            graceful_reads: 3,
            ..Default::default()
        });
        let name = derive_pod_name(DEFAULT_NAME_PREFIX, "env-4b");
        fake.pods
            .lock()
            .unwrap()
            .insert(name.clone(), PHASE_FAILED.to_string());
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        provisioner.ensure_pod("env-4b").await.unwrap();
        assert_eq!(fake.pod_deletes.load(Ordering::SeqCst), 1);
        assert_eq!(fake.pod_creates.load(Ordering::SeqCst), 1);
        assert_eq!(fake.phase(&name).as_deref(), Some("Running"));
        assert!(fake.terminating.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminating_pod_is_awaited_before_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator {
            graceful_reads: 2,
            ..Default::default()
        });
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        let name = provisioner.ensure_pod("env-4c").await.unwrap();
        provisioner.reclaim("env-4c").await.unwrap();
        // The old pod is still shutting down when the environment comes back.
        assert!(fake.phase(&name).is_some());

        assert_eq!(provisioner.ensure_pod("env-4c").await.unwrap(), name);
        assert_eq!(fake.pod_creates.load(Ordering::SeqCst), 2);
        assert_eq!(fake.phase(&name).as_deref(), Some("Running"));
    }

    #[tokio::test]
    async fn test_slow_termination_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator {
            graceful_reads: usize::MAX,
            ..Default::default()
        });
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        provisioner.ensure_pod("env-4d").await.unwrap();
        provisioner.reclaim("env-4d").await.unwrap();

        let err = provisioner.ensure_pod("env-4d").await.unwrap_err();
        assert!(matches!(err, PodError::ProvisioningTimeout { .. }));
        assert_eq!(fake.pod_creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflict_after_own_delete_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator {
            create_conflicts: AtomicUsize::new(1),
            ..Default::default()
        });
        let name = derive_pod_name(DEFAULT_NAME_PREFIX, "env-4e");
        fake.pods
            .lock()
            .unwrap()
            .insert(name, PHASE_FAILED.to_string());
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        let err = provisioner.ensure_pod("env-4e").await.unwrap_err();
        assert!(matches!(err, PodError::AlreadyExists { .. }));
        assert_eq!(fake.service_creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_service_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator::default());
        let name = derive_pod_name(DEFAULT_NAME_PREFIX, "env-5");
        fake.pods
            .lock()
            .unwrap()
            .insert(name.clone(), "Running".to_string());
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        provisioner.ensure_pod("env-5").await.unwrap();
        assert_eq!(fake.pod_creates.load(Ordering::SeqCst), 0);
        assert_eq!(fake.service_creates.load(Ordering::SeqCst), 1);
        assert!(fake.services.lock().unwrap().contains(&name));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator {
            service_failures: AtomicUsize::new(2),
            ..Default::default()
        });
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        provisioner.ensure_pod("env-6").await.unwrap();
        assert_eq!(fake.service_creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator {
            service_failures: AtomicUsize::new(10),
            ..Default::default()
        });
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        let err = provisioner.ensure_pod("env-7").await.unwrap_err();
        assert!(matches!(err, PodError::Api { .. }));
        // Three attempts were consumed, the rest of the failures remain.
        assert_eq!(fake.service_failures.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_invalid_environment_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator::default());
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        for id in ["", "../escape", "a/b", "with space"] {
            let err = provisioner.ensure_pod(id).await.unwrap_err();
            assert!(matches!(err, PodError::InvalidInput(_)), "{id} should fail");
        }
        assert_eq!(fake.pod_creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reclaim_removes_pod_and_service() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOrchestrator::default());
        let provisioner = PodProvisioner::new(fake.clone(), test_config(dir.path()));

        let name = provisioner.ensure_pod("env-8").await.unwrap();
        provisioner.reclaim("env-8").await.unwrap();

        assert!(!fake.pods.lock().unwrap().contains_key(&name));
        assert!(!fake.services.lock().unwrap().contains(&name));
        // Data survives reclamation.
        assert!(dir.path().join("env-8").is_dir());
    }
}
