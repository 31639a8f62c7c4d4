//! Environment data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Environment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    /// Row exists, pod not confirmed yet.
    Provisioning,
    /// Pod scheduled and addressable.
    Ready,
    /// No relay activity for a while.
    Idle,
    /// Pod and service deleted; data kept.
    Reclaimed,
    /// Last provisioning attempt failed.
    Failed,
}

impl EnvironmentStatus {
    /// Whether `resolve_or_create` must (re)run provisioning for this status.
    pub fn needs_provisioning(self) -> bool {
        matches!(
            self,
            EnvironmentStatus::Provisioning
                | EnvironmentStatus::Reclaimed
                | EnvironmentStatus::Failed
        )
    }
}

impl std::fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentStatus::Provisioning => write!(f, "provisioning"),
            EnvironmentStatus::Ready => write!(f, "ready"),
            EnvironmentStatus::Idle => write!(f, "idle"),
            EnvironmentStatus::Reclaimed => write!(f, "reclaimed"),
            EnvironmentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for EnvironmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "provisioning" => Ok(EnvironmentStatus::Provisioning),
            "ready" => Ok(EnvironmentStatus::Ready),
            "idle" => Ok(EnvironmentStatus::Idle),
            "reclaimed" => Ok(EnvironmentStatus::Reclaimed),
            "failed" => Ok(EnvironmentStatus::Failed),
            _ => Err(format!("unknown environment status: {}", s)),
        }
    }
}

impl TryFrom<String> for EnvironmentStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Owner of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Actor {
    User(String),
    Group(String),
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Actor::User(id) | Actor::Group(id) => id,
        }
    }

    /// Group-owned environments are collaborative.
    pub fn is_collaborative(&self) -> bool {
        matches!(self, Actor::Group(_))
    }

    fn from_parts(owner_id: String, is_collaborative: bool) -> Self {
        if is_collaborative {
            Actor::Group(owner_id)
        } else {
            Actor::User(owner_id)
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{}", id),
            Actor::Group(id) => write!(f, "group:{}", id),
        }
    }
}

/// An isolated coding workspace bound to an assignment and an owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub environment_id: String,
    pub course_id: String,
    pub assignment_id: String,
    pub owner: Actor,
    /// Cluster-internal service name of the pod.
    pub internal_address: Option<String>,
    /// Opaque editor layout blob.
    pub layout: Option<String>,
    pub is_running: bool,
    pub status: EnvironmentStatus,
    /// Assignment files have been copied into the workspace.
    #[serde(skip)]
    pub seeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_activity_at: String,
}

impl Environment {
    pub fn is_collaborative(&self) -> bool {
        self.owner.is_collaborative()
    }
}

/// Database row of an environment.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct EnvironmentRow {
    pub environment_id: String,
    pub course_id: String,
    pub assignment_id: String,
    pub owner_id: String,
    pub is_collaborative: bool,
    pub internal_address: Option<String>,
    pub layout: Option<String>,
    pub is_running: bool,
    #[sqlx(try_from = "String")]
    pub status: EnvironmentStatus,
    pub seeded: bool,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_activity_at: String,
}

impl From<EnvironmentRow> for Environment {
    fn from(row: EnvironmentRow) -> Self {
        Self {
            environment_id: row.environment_id,
            course_id: row.course_id,
            assignment_id: row.assignment_id,
            owner: Actor::from_parts(row.owner_id, row.is_collaborative),
            internal_address: row.internal_address,
            layout: row.layout,
            is_running: row.is_running,
            status: row.status,
            seeded: row.seeded,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_activity_at: row.last_activity_at,
        }
    }
}

/// Request body for `POST /environment`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEnvironmentRequest {
    pub course_id: String,
    #[serde(alias = "assign_id")]
    pub assignment_id: String,
}

/// Request body for `PUT /environment/{id}/layout`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLayoutRequest {
    pub layout: String,
}
