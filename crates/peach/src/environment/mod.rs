//! Environment registry.
//!
//! Maps (assignment, owner) pairs to provisioned workspace pods, seeds new
//! workspaces with the assignment's files, and tracks environment liveness.

mod activity;
mod error;
mod models;
mod reaper;
mod repository;
mod seed;
mod service;

pub use activity::{ActivityTracker, SessionGuard};
pub use error::{EnvironmentError, EnvironmentResult};
pub use models::{
    Actor, CreateEnvironmentRequest, Environment, EnvironmentStatus, UpdateLayoutRequest,
};
pub use reaper::{ReapReport, ReaperConfig};
pub use repository::EnvironmentRepository;
pub use seed::seed_workspace;
pub use service::{EnvironmentService, Resolution};
