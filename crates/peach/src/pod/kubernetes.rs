//! Kubernetes-backed orchestrator client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Config};
use log::{debug, info};

use super::error::{PodError, PodResult};
use super::{OrchestratorApi, PHASE_TERMINATING};

/// Orchestrator client talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeOrchestrator {
    pods: Api<Pod>,
    services: Api<Service>,
    namespace: String,
}

impl KubeOrchestrator {
    /// Build a client and verify the control plane is reachable.
    ///
    /// Called once at startup; failure here is fatal for the process.
    pub async fn connect(namespace: &str, in_cluster: bool) -> Result<Self> {
        let config = if in_cluster {
            Config::incluster().context("loading in-cluster kubernetes config")?
        } else {
            Config::infer()
                .await
                .context("inferring kubernetes config")?
        };

        let client = Client::try_from(config).context("building kubernetes client")?;
        let version = client
            .apiserver_version()
            .await
            .context("reaching kubernetes API server")?;
        info!(
            "Connected to kubernetes {}.{} (namespace {})",
            version.major, version.minor, namespace
        );

        Ok(Self::with_client(client, namespace))
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

fn map_create_error(kind: &'static str, name: &str, err: kube::Error) -> PodError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => PodError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        other => PodError::api(format!("create {kind} {name}"), other),
    }
}

/// Phase reported for a pod. A pod with a deletion timestamp is terminating
/// whatever its status says, and its name stays taken until it is gone.
fn phase_of(pod: &Pod) -> String {
    if pod.metadata.deletion_timestamp.is_some() {
        return PHASE_TERMINATING.to_string();
    }
    pod.status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait]
impl OrchestratorApi for KubeOrchestrator {
    async fn pod_phase(&self, name: &str) -> PodResult<Option<String>> {
        match self.pods.get_opt(name).await {
            Ok(Some(pod)) => Ok(Some(phase_of(&pod))),
            Ok(None) => Ok(None),
            Err(err) => Err(PodError::api(format!("read pod {name}"), err)),
        }
    }

    async fn create_pod(&self, pod: &Pod) -> PodResult<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        debug!("Creating pod {} in {}", name, self.namespace);
        self.pods
            .create(&PostParams::default(), pod)
            .await
            .map(|_| ())
            .map_err(|err| map_create_error("pod", &name, err))
    }

    async fn delete_pod(&self, name: &str) -> PodResult<()> {
        match self.pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(PodError::api(format!("delete pod {name}"), err)),
        }
    }

    async fn service_exists(&self, name: &str) -> PodResult<bool> {
        self.services
            .get_opt(name)
            .await
            .map(|svc| svc.is_some())
            .map_err(|err| PodError::api(format!("read service {name}"), err))
    }

    async fn create_service(&self, service: &Service) -> PodResult<()> {
        let name = service.metadata.name.clone().unwrap_or_default();
        debug!("Creating service {} in {}", name, self.namespace);
        self.services
            .create(&PostParams::default(), service)
            .await
            .map(|_| ())
            .map_err(|err| map_create_error("service", &name, err))
    }

    async fn delete_service(&self, name: &str) -> PodResult<()> {
        match self.services.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(PodError::api(format!("delete service {name}"), err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn pod_in(phase: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_of_reports_status_phase() {
        assert_eq!(phase_of(&pod_in(Some("Running"))), "Running");
        assert_eq!(phase_of(&pod_in(None)), "Unknown");
        assert_eq!(phase_of(&Pod::default()), "Unknown");
    }

    #[test]
    fn test_deleted_pod_is_terminating() {
        let mut pod = pod_in(Some("Running"));
        pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(phase_of(&pod), PHASE_TERMINATING);
    }
}
