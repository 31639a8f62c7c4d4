//! Course repository for database operations.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{Assignment, AssignmentFile, Course, CourseGroup};

/// Read access to courses, assignments, files and groups.
#[derive(Debug, Clone)]
pub struct CourseRepository {
    pool: SqlitePool,
}

impl CourseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_course(&self, course_id: &str) -> Result<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(
            r#"
            SELECT course_id, name, require_group
            FROM courses
            WHERE course_id = ?
            "#,
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching course")?;

        Ok(course)
    }

    pub async fn get_assignment(&self, assignment_id: &str) -> Result<Option<Assignment>> {
        let assignment = sqlx::query_as::<_, Assignment>(
            r#"
            SELECT assignment_id, course_id, name
            FROM assignments
            WHERE assignment_id = ?
            "#,
        )
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching assignment")?;

        Ok(assignment)
    }

    /// Files attached to an assignment, in display order, excluding deleted ones.
    pub async fn list_assignment_files(&self, assignment_id: &str) -> Result<Vec<AssignmentFile>> {
        let files = sqlx::query_as::<_, AssignmentFile>(
            r#"
            SELECT file_id, assignment_id, file_name, file_path, content_b64, is_deleted, position
            FROM files
            WHERE assignment_id = ? AND is_deleted = 0
            ORDER BY position ASC, file_id ASC
            "#,
        )
        .bind(assignment_id)
        .fetch_all(&self.pool)
        .await
        .context("listing assignment files")?;

        Ok(files)
    }

    /// The group a user belongs to within a course, if any.
    pub async fn find_group_for_member(
        &self,
        course_id: &str,
        user_id: &str,
    ) -> Result<Option<CourseGroup>> {
        let group = sqlx::query_as::<_, CourseGroup>(
            r#"
            SELECT g.group_id, g.course_id, g.name
            FROM course_groups g
            JOIN group_members m ON m.group_id = g.group_id
            WHERE g.course_id = ? AND m.user_id = ?
            ORDER BY g.group_id ASC
            LIMIT 1
            "#,
        )
        .bind(course_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("finding group for member")?;

        Ok(group)
    }

    pub async fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM group_members
            WHERE group_id = ? AND user_id = ?
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("checking group membership")?;

        Ok(row.is_some())
    }

    pub async fn insert_course(&self, course: &Course) -> Result<()> {
        sqlx::query("INSERT INTO courses (course_id, name, require_group) VALUES (?, ?, ?)")
            .bind(&course.course_id)
            .bind(&course.name)
            .bind(course.require_group)
            .execute(&self.pool)
            .await
            .context("inserting course")?;
        Ok(())
    }

    pub async fn insert_assignment(&self, assignment: &Assignment) -> Result<()> {
        sqlx::query("INSERT INTO assignments (assignment_id, course_id, name) VALUES (?, ?, ?)")
            .bind(&assignment.assignment_id)
            .bind(&assignment.course_id)
            .bind(&assignment.name)
            .execute(&self.pool)
            .await
            .context("inserting assignment")?;
        Ok(())
    }

    pub async fn insert_file(&self, file: &AssignmentFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                file_id, assignment_id, file_name, file_path, content_b64, is_deleted, position
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.file_id)
        .bind(&file.assignment_id)
        .bind(&file.file_name)
        .bind(&file.file_path)
        .bind(&file.content_b64)
        .bind(file.is_deleted)
        .bind(file.position)
        .execute(&self.pool)
        .await
        .context("inserting assignment file")?;
        Ok(())
    }

    pub async fn insert_group(&self, group: &CourseGroup) -> Result<()> {
        sqlx::query("INSERT INTO course_groups (group_id, course_id, name) VALUES (?, ?, ?)")
            .bind(&group.group_id)
            .bind(&group.course_id)
            .bind(&group.name)
            .execute(&self.pool)
            .await
            .context("inserting group")?;
        Ok(())
    }

    pub async fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("adding group member")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn repo() -> CourseRepository {
        let db = Database::in_memory().await.unwrap();
        CourseRepository::new(db.pool().clone())
    }

    fn course(id: &str, require_group: bool) -> Course {
        Course {
            course_id: id.to_string(),
            name: format!("Course {id}"),
            require_group,
        }
    }

    fn file(id: &str, position: i64, is_deleted: bool) -> AssignmentFile {
        AssignmentFile {
            file_id: id.to_string(),
            assignment_id: "a1".to_string(),
            file_name: format!("{id}.txt"),
            file_path: String::new(),
            content_b64: String::new(),
            is_deleted,
            position,
        }
    }

    #[tokio::test]
    async fn test_course_and_assignment_lookup() {
        let repo = repo().await;
        repo.insert_course(&course("c1", true)).await.unwrap();
        repo.insert_assignment(&Assignment {
            assignment_id: "a1".to_string(),
            course_id: "c1".to_string(),
            name: "Lab 1".to_string(),
        })
        .await
        .unwrap();

        let found = repo.get_course("c1").await.unwrap().unwrap();
        assert!(found.require_group);
        assert!(repo.get_course("missing").await.unwrap().is_none());

        let assignment = repo.get_assignment("a1").await.unwrap().unwrap();
        assert_eq!(assignment.course_id, "c1");
    }

    #[tokio::test]
    async fn test_files_ordered_and_deleted_skipped() {
        let repo = repo().await;
        repo.insert_course(&course("c1", false)).await.unwrap();
        repo.insert_assignment(&Assignment {
            assignment_id: "a1".to_string(),
            course_id: "c1".to_string(),
            name: "Lab 1".to_string(),
        })
        .await
        .unwrap();

        repo.insert_file(&file("f3", 3, false)).await.unwrap();
        repo.insert_file(&file("f1", 1, false)).await.unwrap();
        repo.insert_file(&file("f2", 2, true)).await.unwrap();

        let files = repo.list_assignment_files("a1").await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.file_id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f3"]);
    }

    #[tokio::test]
    async fn test_group_membership() {
        let repo = repo().await;
        repo.insert_course(&course("c1", true)).await.unwrap();
        repo.insert_course(&course("c2", true)).await.unwrap();
        repo.insert_group(&CourseGroup {
            group_id: "g1".to_string(),
            course_id: "c1".to_string(),
            name: "Team".to_string(),
        })
        .await
        .unwrap();
        repo.add_group_member("g1", "u1").await.unwrap();
        repo.add_group_member("g1", "u1").await.unwrap();

        let group = repo.find_group_for_member("c1", "u1").await.unwrap();
        assert_eq!(group.unwrap().group_id, "g1");
        assert!(repo.find_group_for_member("c2", "u1").await.unwrap().is_none());
        assert!(repo.find_group_for_member("c1", "u2").await.unwrap().is_none());

        assert!(repo.is_group_member("g1", "u1").await.unwrap());
        assert!(!repo.is_group_member("g1", "u2").await.unwrap());
    }
}
