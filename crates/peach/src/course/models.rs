//! Course data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A course.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub course_id: String,
    pub name: String,
    /// Environments of this course belong to groups rather than users.
    pub require_group: bool,
}

/// An assignment within a course.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub assignment_id: String,
    pub course_id: String,
    pub name: String,
}

/// A file attached to an assignment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssignmentFile {
    pub file_id: String,
    pub assignment_id: String,
    pub file_name: String,
    /// Directory relative to the workspace root. Empty means the root.
    pub file_path: String,
    /// Base64 encoded content.
    pub content_b64: String,
    pub is_deleted: bool,
    pub position: i64,
}

/// A student group within a course.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseGroup {
    pub group_id: String,
    pub course_id: String,
    pub name: String,
}
