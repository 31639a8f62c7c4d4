//! Environment registry service.
//!
//! Resolves the environment of a (course, assignment, caller) triple,
//! creating and provisioning it on first access.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::activity::ActivityTracker;
use super::error::{EnvironmentError, EnvironmentResult};
use super::models::{Actor, Environment, EnvironmentStatus};
use super::repository::EnvironmentRepository;
use super::seed::seed_workspace;
use crate::course::CourseRepository;
use crate::pod::PodProvisioner;
use crate::workspace::WorkspaceFiles;

/// Outcome of [`EnvironmentService::resolve_or_create`].
#[derive(Debug, Clone)]
pub struct Resolution {
    pub environment: Environment,
    /// `true` when this call created the environment row.
    pub created: bool,
}

/// Service for environment lookup, creation and lifecycle.
pub struct EnvironmentService {
    repo: EnvironmentRepository,
    courses: CourseRepository,
    provisioner: PodProvisioner,
    activity: ActivityTracker,
    /// Serializes provisioning per (assignment, owner).
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EnvironmentService {
    pub fn new(
        repo: EnvironmentRepository,
        courses: CourseRepository,
        provisioner: PodProvisioner,
    ) -> Self {
        Self {
            repo,
            courses,
            provisioner,
            activity: ActivityTracker::new(),
            locks: DashMap::new(),
        }
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    pub fn provisioner(&self) -> &PodProvisioner {
        &self.provisioner
    }

    pub(crate) fn repo(&self) -> &EnvironmentRepository {
        &self.repo
    }

    /// Find or create the caller's environment for an assignment.
    ///
    /// Ready environments are returned as-is. Anything else is provisioned
    /// before returning; on failure the row is marked failed and the error
    /// is surfaced.
    pub async fn resolve_or_create(
        &self,
        course_id: &str,
        assignment_id: &str,
        user_id: &str,
    ) -> EnvironmentResult<Resolution> {
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| EnvironmentError::NotFound(format!("course {}", course_id)))?;

        match self.courses.get_assignment(assignment_id).await? {
            Some(assignment) if assignment.course_id == course.course_id => {}
            _ => {
                return Err(EnvironmentError::NotFound(format!(
                    "assignment {}",
                    assignment_id
                )));
            }
        }

        let owner = if course.require_group {
            let group = self
                .courses
                .find_group_for_member(course_id, user_id)
                .await?
                .ok_or_else(|| EnvironmentError::GroupRequired {
                    course_id: course_id.to_string(),
                })?;
            Actor::Group(group.group_id)
        } else {
            Actor::User(user_id.to_string())
        };

        if let Some(existing) = self.repo.find_by_owner(assignment_id, &owner).await?
            && !existing.status.needs_provisioning()
            && let Some(resolution) = self.reuse(existing).await?
        {
            return Ok(resolution);
        }

        let key = owner_key(assignment_id, &owner);
        self.with_owner_lock(
            &key,
            self.create_or_provision(course_id, assignment_id, &owner),
        )
        .await
    }

    async fn create_or_provision(
        &self,
        course_id: &str,
        assignment_id: &str,
        owner: &Actor,
    ) -> EnvironmentResult<Resolution> {
        let environment_id = uuid::Uuid::new_v4().to_string();
        let (environment, created) = self
            .repo
            .insert_or_get(&environment_id, course_id, assignment_id, owner)
            .await?;

        let environment = if created {
            info!(
                "Created environment {} for {} on assignment {}",
                environment.environment_id, owner, assignment_id
            );
            environment
        } else if !environment.status.needs_provisioning() {
            // Provisioned by a concurrent request while we waited for the lock.
            let environment_id = environment.environment_id.clone();
            match self.reuse(environment).await? {
                Some(resolution) => return Ok(resolution),
                None => self.get(&environment_id).await?,
            }
        } else {
            environment
        };

        let environment = self.provision(environment).await?;
        Ok(Resolution {
            environment,
            created,
        })
    }

    /// Hand out an already provisioned environment, waking it if idle.
    ///
    /// Returns `None` when the row needs provisioning after all, which
    /// happens when the reaper reclaimed it between our read and the wake.
    async fn reuse(
        &self,
        environment: Environment,
    ) -> EnvironmentResult<Option<Resolution>> {
        let environment = if environment.status == EnvironmentStatus::Idle {
            self.touch(&environment.environment_id).await?;
            self.get(&environment.environment_id).await?
        } else {
            environment
        };
        if environment.status.needs_provisioning() {
            debug!(
                "Environment {} became {} before reuse",
                environment.environment_id, environment.status
            );
            return Ok(None);
        }

        debug!("Reusing environment {}", environment.environment_id);
        Ok(Some(Resolution {
            environment,
            created: false,
        }))
    }

    /// Seed (once per environment), ensure the pod and record the address.
    async fn provision(&self, environment: Environment) -> EnvironmentResult<Environment> {
        let environment_id = environment.environment_id.clone();

        match self.try_provision(&environment).await {
            Ok(address) => {
                self.repo.mark_ready(&environment_id, &address).await?;
                info!("Environment {} ready at {}", environment_id, address);
            }
            Err(err) => {
                warn!("Provisioning environment {} failed: {}", environment_id, err);
                if let Err(e) = self.repo.mark_failed(&environment_id, &err.to_string()).await {
                    warn!("Failed to mark environment {} failed: {:?}", environment_id, e);
                }
                return Err(err);
            }
        }

        self.get(&environment_id).await
    }

    async fn try_provision(&self, environment: &Environment) -> EnvironmentResult<String> {
        // Seeding happens once; later attempts may find user edits on disk.
        if !environment.seeded {
            let files = self
                .courses
                .list_assignment_files(&environment.assignment_id)
                .await?;
            let workspace = self.provisioner.data_dir(&environment.environment_id)?;
            let written = seed_workspace(&workspace, &files).await?;
            self.repo.mark_seeded(&environment.environment_id).await?;
            debug!(
                "Seeded {} file(s) into {}",
                written,
                workspace.display()
            );
        }

        let address = self
            .provisioner
            .ensure_pod(&environment.environment_id)
            .await?;
        Ok(address)
    }

    /// Get an environment by ID.
    pub async fn get(&self, environment_id: &str) -> EnvironmentResult<Environment> {
        self.repo
            .get(environment_id)
            .await?
            .ok_or_else(|| EnvironmentError::NotFound(format!("environment {}", environment_id)))
    }

    /// Check that a user may use an environment: the owning user, or a
    /// member of the owning group.
    pub async fn authorize(&self, environment: &Environment, user_id: &str) -> EnvironmentResult<()> {
        let allowed = match &environment.owner {
            Actor::User(owner) => owner == user_id,
            Actor::Group(group_id) => self.courses.is_group_member(group_id, user_id).await?,
        };

        if allowed {
            Ok(())
        } else {
            Err(EnvironmentError::Forbidden {
                environment_id: environment.environment_id.clone(),
                user_id: user_id.to_string(),
            })
        }
    }

    /// Fetch an environment the user is allowed to use.
    pub async fn get_for_user(
        &self,
        environment_id: &str,
        user_id: &str,
    ) -> EnvironmentResult<Environment> {
        let environment = self.get(environment_id).await?;
        self.authorize(&environment, user_id).await?;
        Ok(environment)
    }

    /// Replace the editor layout. Restricted to the owning user or group.
    pub async fn update_layout(
        &self,
        environment_id: &str,
        user_id: &str,
        layout: &str,
    ) -> EnvironmentResult<Environment> {
        self.get_for_user(environment_id, user_id).await?;
        self.repo.update_layout(environment_id, layout).await?;
        self.get(environment_id).await
    }

    /// Workspace files of an environment the user is allowed to use.
    pub async fn workspace_for_user(
        &self,
        environment_id: &str,
        user_id: &str,
    ) -> EnvironmentResult<WorkspaceFiles> {
        let environment = self.get_for_user(environment_id, user_id).await?;
        let root = self.provisioner.data_dir(&environment.environment_id)?;
        Ok(WorkspaceFiles::new(root))
    }

    /// Record activity on an environment.
    pub async fn touch(&self, environment_id: &str) -> EnvironmentResult<()> {
        if self.repo.touch(environment_id).await? {
            Ok(())
        } else {
            Err(EnvironmentError::NotFound(format!(
                "environment {}",
                environment_id
            )))
        }
    }

    /// Run `work` while holding the provisioning lock of an owner key.
    ///
    /// The lock entry is dropped afterwards unless another caller is
    /// already waiting on it.
    pub(crate) async fn with_owner_lock<T>(
        &self,
        key: &str,
        work: impl Future<Output = T>,
    ) -> T {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Number of owner keys that currently hold a provisioning lock entry.
    pub fn lock_entries(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) fn owner_key(assignment_id: &str, owner: &Actor) -> String {
    format!("{}/{}", assignment_id, owner)
}
