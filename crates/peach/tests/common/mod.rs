//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::api::core::v1::{Pod, Service};
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use peach::api::{self, AppState};
use peach::auth::{AuthConfig, AuthState, DevUser};
use peach::course::{Assignment, AssignmentFile, Course, CourseGroup, CourseRepository};
use peach::db::Database;
use peach::environment::{EnvironmentRepository, EnvironmentService};
use peach::pod::{
    OrchestratorApi, PodError, PodProvisioner, PodResult, ProvisionerConfig, WorkspaceTemplate,
};
use peach::relay::RelayConfig;
use peach::terminal::{TerminalClient, TerminalConfig};

/// In-memory orchestrator whose pods are scheduled immediately.
#[derive(Default)]
pub struct FakeOrchestrator {
    pods: Mutex<HashMap<String, String>>,
    services: Mutex<HashSet<String>>,
    /// Deleted pods still shutting down, with the reads they have left.
    terminating: Mutex<HashMap<String, usize>>,
    pub pod_creates: AtomicUsize,
    pub pod_deletes: AtomicUsize,
    pub service_creates: AtomicUsize,
    /// Pod creations that fail with an API error before one succeeds.
    pub failing_creates: AtomicUsize,
    /// Status reads a deleted pod keeps reporting Terminating.
    pub graceful_reads: AtomicUsize,
}

impl FakeOrchestrator {
    pub fn pod_creates(&self) -> usize {
        self.pod_creates.load(Ordering::SeqCst)
    }

    pub fn pod_deletes(&self) -> usize {
        self.pod_deletes.load(Ordering::SeqCst)
    }

    /// A pod exists under `name` and is not shutting down.
    pub fn has_pod(&self, name: &str) -> bool {
        !self.terminating.lock().unwrap().contains_key(name)
            && self.pods.lock().unwrap().contains_key(name)
    }
}

#[async_trait]
impl OrchestratorApi for FakeOrchestrator {
    async fn pod_phase(&self, name: &str) -> PodResult<Option<String>> {
        let mut terminating = self.terminating.lock().unwrap();
        if let Some(left) = terminating.get_mut(name) {
            if *left > 0 {
                *left -= 1;
                return Ok(Some("Terminating".to_string()));
            }
            terminating.remove(name);
            self.pods.lock().unwrap().remove(name);
            return Ok(None);
        }
        Ok(self.pods.lock().unwrap().get(name).cloned())
    }

    async fn create_pod(&self, pod: &Pod) -> PodResult<()> {
        // Widen the window in which concurrent callers could race.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let name = pod.metadata.name.clone().unwrap();
        if self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PodError::api(format!("create pod {name}"), "quota exceeded"));
        }
        let mut pods = self.pods.lock().unwrap();
        if pods.contains_key(&name) {
            return Err(PodError::AlreadyExists { kind: "pod", name });
        }
        self.pod_creates.fetch_add(1, Ordering::SeqCst);
        pods.insert(name, "Running".to_string());
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> PodResult<()> {
        self.pod_deletes.fetch_add(1, Ordering::SeqCst);
        let grace = self.graceful_reads.load(Ordering::SeqCst);
        let mut terminating = self.terminating.lock().unwrap();
        let mut pods = self.pods.lock().unwrap();
        if grace == 0 {
            pods.remove(name);
        } else if pods.contains_key(name) {
            terminating.entry(name.to_string()).or_insert(grace);
        }
        Ok(())
    }

    async fn service_exists(&self, name: &str) -> PodResult<bool> {
        Ok(self.services.lock().unwrap().contains(name))
    }

    async fn create_service(&self, service: &Service) -> PodResult<()> {
        let name = service.metadata.name.clone().unwrap();
        let mut services = self.services.lock().unwrap();
        if !services.insert(name.clone()) {
            return Err(PodError::AlreadyExists {
                kind: "service",
                name,
            });
        }
        self.service_creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> PodResult<()> {
        self.services.lock().unwrap().remove(name);
        Ok(())
    }
}

/// A fully wired application backed by an in-memory database, a fake
/// orchestrator and a temporary workspace root.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub service: Arc<EnvironmentService>,
    pub courses: CourseRepository,
    pub environments: EnvironmentRepository,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub data_dir: TempDir,
}

fn test_auth_config() -> AuthConfig {
    AuthConfig {
        dev_mode: true,
        jwt_secret: Some("test-secret-for-integration-tests-minimum-32-chars".to_string()),
        dev_users: ["u1", "u2", "u3"]
            .into_iter()
            .map(|id| DevUser {
                id: id.to_string(),
                name: format!("User {}", id),
            })
            .collect(),
        ..Default::default()
    }
}

/// Create a test application with the default workspace template.
pub async fn test_app() -> TestApp {
    test_app_with_template(WorkspaceTemplate::default()).await
}

/// Create a test application whose pods listen on the template's ports.
pub async fn test_app_with_template(template: WorkspaceTemplate) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let orchestrator = Arc::new(FakeOrchestrator::default());

    let terminal_port = template.terminal_port;
    let provisioner = PodProvisioner::new(
        orchestrator.clone(),
        ProvisionerConfig {
            data_root: data_dir.path().to_path_buf(),
            template,
            provision_timeout: Duration::from_secs(2),
            poll_initial: Duration::from_millis(5),
            poll_max: Duration::from_millis(20),
            ..Default::default()
        },
    );

    let courses = CourseRepository::new(db.pool().clone());
    let environments = EnvironmentRepository::new(db.pool().clone());
    let service = Arc::new(EnvironmentService::new(
        environments.clone(),
        courses.clone(),
        provisioner,
    ));

    let terminal = TerminalClient::new(&TerminalConfig { init_timeout_secs: 2 }, terminal_port)
        .unwrap();
    let state = AppState::new(
        service.clone(),
        terminal,
        RelayConfig {
            connect_timeout_secs: 2,
        },
        AuthState::new(test_auth_config()),
        CancellationToken::new(),
    );

    TestApp {
        router: api::create_router(state.clone()),
        state,
        service,
        courses,
        environments,
        orchestrator,
        data_dir,
    }
}

/// Insert a course with one assignment and its files.
pub async fn seed_course(
    courses: &CourseRepository,
    course_id: &str,
    assignment_id: &str,
    require_group: bool,
    files: &[(&str, &str, &[u8])],
) {
    courses
        .insert_course(&Course {
            course_id: course_id.to_string(),
            name: format!("Course {}", course_id),
            require_group,
        })
        .await
        .unwrap();
    courses
        .insert_assignment(&Assignment {
            assignment_id: assignment_id.to_string(),
            course_id: course_id.to_string(),
            name: format!("Assignment {}", assignment_id),
        })
        .await
        .unwrap();

    for (position, (name, path, content)) in files.iter().enumerate() {
        courses
            .insert_file(&AssignmentFile {
                file_id: format!("{}-{}", assignment_id, position),
                assignment_id: assignment_id.to_string(),
                file_name: name.to_string(),
                file_path: path.to_string(),
                content_b64: STANDARD.encode(content),
                is_deleted: false,
                position: position as i64,
            })
            .await
            .unwrap();
    }
}

/// Create a group and add members.
pub async fn seed_group(courses: &CourseRepository, course_id: &str, group_id: &str, members: &[&str]) {
    courses
        .insert_group(&CourseGroup {
            group_id: group_id.to_string(),
            course_id: course_id.to_string(),
            name: format!("Group {}", group_id),
        })
        .await
        .unwrap();
    for member in members {
        courses.add_group_member(group_id, member).await.unwrap();
    }
}

/// Serve the router on a loopback port and return its address.
pub async fn serve(router: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub async fn body_json(response: Response<axum::body::Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
