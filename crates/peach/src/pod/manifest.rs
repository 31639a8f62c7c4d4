//! Pod and service manifests for environment workspaces.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};

/// Label shared by every environment pod.
pub const APP_LABEL: &str = "app";
/// Label selecting a single environment pod.
pub const INSTANCE_LABEL: &str = "peach/instance";

const DATA_VOLUME: &str = "data-volume";
const FILE_SYNC_PORT_NAME: &str = "file-sync";
const TERMINAL_PORT_NAME: &str = "terminal";

/// Workspace image and volume settings used to render manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceTemplate {
    /// Value of the `app` label on every pod.
    pub app_label: String,
    /// Workspace image reference.
    pub image: String,
    /// Image pull policy.
    pub image_pull_policy: String,
    /// Shared ReadWriteMany claim holding every environment's data.
    pub pvc_claim: String,
    /// Mount path of the environment's data inside the pod.
    pub mount_path: String,
    /// Port of the file-sync WebSocket server.
    pub file_port: u16,
    /// Port of the terminal service.
    pub terminal_port: u16,
}

impl Default for WorkspaceTemplate {
    fn default() -> Self {
        Self {
            app_label: "peach-ws".to_string(),
            image: "ghcr.io/chanbengz/peach-websocket:latest".to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            pvc_claim: "backend-pv-claim".to_string(),
            mount_path: "/root/data".to_string(),
            file_port: 1234,
            terminal_port: 4000,
        }
    }
}

impl WorkspaceTemplate {
    fn labels(&self, name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL.to_string(), self.app_label.clone()),
            (INSTANCE_LABEL.to_string(), name.to_string()),
        ])
    }

    /// Render the pod manifest for an environment.
    pub fn pod(&self, name: &str, environment_id: &str) -> Pod {
        let container = Container {
            name: name.to_string(),
            image: Some(self.image.clone()),
            image_pull_policy: Some(self.image_pull_policy.clone()),
            ports: Some(vec![
                ContainerPort {
                    container_port: i32::from(self.file_port),
                    name: Some(FILE_SYNC_PORT_NAME.to_string()),
                    ..Default::default()
                },
                ContainerPort {
                    container_port: i32::from(self.terminal_port),
                    name: Some(TERMINAL_PORT_NAME.to_string()),
                    ..Default::default()
                },
            ]),
            volume_mounts: Some(vec![VolumeMount {
                mount_path: self.mount_path.clone(),
                name: DATA_VOLUME.to_string(),
                sub_path: Some(environment_id.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(self.labels(name)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container],
                volumes: Some(vec![Volume {
                    name: DATA_VOLUME.to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: self.pvc_claim.clone(),
                        read_only: None,
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Render the ClusterIP service exposing both workspace ports.
    pub fn service(&self, name: &str) -> Service {
        let port = |port_name: &str, port: u16| ServicePort {
            name: Some(port_name.to_string()),
            port: i32::from(port),
            target_port: Some(IntOrString::Int(i32::from(port))),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        };

        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(self.labels(name)),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(self.labels(name)),
                ports: Some(vec![
                    port(FILE_SYNC_PORT_NAME, self.file_port),
                    port(TERMINAL_PORT_NAME, self.terminal_port),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
