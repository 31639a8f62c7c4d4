//! Course context consumed by the environment registry.
//!
//! Courses, assignments, attached files and groups are owned by the wider
//! platform. This module only reads them, plus a few insert helpers used by
//! tests and the `peach init` seeding path.

mod models;
mod repository;

pub use models::{Assignment, AssignmentFile, Course, CourseGroup};
pub use repository::CourseRepository;
