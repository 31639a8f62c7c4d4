//! Environment database repository.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{Actor, Environment, EnvironmentRow, EnvironmentStatus};

/// Repository for environment persistence.
#[derive(Debug, Clone)]
pub struct EnvironmentRepository {
    pool: SqlitePool,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl EnvironmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new environment unless one already exists for the same
    /// assignment and owner, then return the stored row.
    ///
    /// The boolean is `true` when this call created the row.
    pub async fn insert_or_get(
        &self,
        environment_id: &str,
        course_id: &str,
        assignment_id: &str,
        owner: &Actor,
    ) -> Result<(Environment, bool)> {
        let timestamp = now();
        let result = sqlx::query(
            r#"
            INSERT INTO environments (
                environment_id, course_id, assignment_id, owner_id, is_collaborative,
                is_running, status, created_at, updated_at, last_activity_at
            ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            ON CONFLICT(assignment_id, owner_id, is_collaborative) DO NOTHING
            "#,
        )
        .bind(environment_id)
        .bind(course_id)
        .bind(assignment_id)
        .bind(owner.id())
        .bind(owner.is_collaborative())
        .bind(EnvironmentStatus::Provisioning.to_string())
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(&timestamp)
        .execute(&self.pool)
        .await
        .context("inserting environment")?;

        let created = result.rows_affected() == 1;
        let environment = self
            .find_by_owner(assignment_id, owner)
            .await?
            .context("environment missing after insert")?;

        Ok((environment, created))
    }

    /// Get an environment by ID.
    pub async fn get(&self, environment_id: &str) -> Result<Option<Environment>> {
        let row = sqlx::query_as::<_, EnvironmentRow>(
            r#"
            SELECT environment_id, course_id, assignment_id, owner_id, is_collaborative,
                   internal_address, layout, is_running, status, seeded, error_message,
                   created_at, updated_at, last_activity_at
            FROM environments
            WHERE environment_id = ?
            "#,
        )
        .bind(environment_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching environment")?;

        Ok(row.map(Environment::from))
    }

    pub async fn find_by_owner(
        &self,
        assignment_id: &str,
        owner: &Actor,
    ) -> Result<Option<Environment>> {
        let row = sqlx::query_as::<_, EnvironmentRow>(
            r#"
            SELECT environment_id, course_id, assignment_id, owner_id, is_collaborative,
                   internal_address, layout, is_running, status, seeded, error_message,
                   created_at, updated_at, last_activity_at
            FROM environments
            WHERE assignment_id = ? AND owner_id = ? AND is_collaborative = ?
            "#,
        )
        .bind(assignment_id)
        .bind(owner.id())
        .bind(owner.is_collaborative())
        .fetch_optional(&self.pool)
        .await
        .context("fetching environment by owner")?;

        Ok(row.map(Environment::from))
    }

    /// List environments in a given status.
    pub async fn list_by_status(&self, status: EnvironmentStatus) -> Result<Vec<Environment>> {
        let rows = sqlx::query_as::<_, EnvironmentRow>(
            r#"
            SELECT environment_id, course_id, assignment_id, owner_id, is_collaborative,
                   internal_address, layout, is_running, status, seeded, error_message,
                   created_at, updated_at, last_activity_at
            FROM environments
            WHERE status = ?
            ORDER BY last_activity_at ASC
            "#,
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await
        .context("listing environments by status")?;

        Ok(rows.into_iter().map(Environment::from).collect())
    }

    /// Record a successful provisioning.
    pub async fn mark_ready(&self, environment_id: &str, internal_address: &str) -> Result<()> {
        let timestamp = now();
        sqlx::query(
            r#"
            UPDATE environments
            SET internal_address = ?, status = ?, is_running = 1, error_message = NULL,
                updated_at = ?, last_activity_at = ?
            WHERE environment_id = ?
            "#,
        )
        .bind(internal_address)
        .bind(EnvironmentStatus::Ready.to_string())
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(environment_id)
        .execute(&self.pool)
        .await
        .context("marking environment ready")?;

        Ok(())
    }

    /// Record that the workspace received its assignment files.
    pub async fn mark_seeded(&self, environment_id: &str) -> Result<()> {
        sqlx::query("UPDATE environments SET seeded = 1, updated_at = ? WHERE environment_id = ?")
            .bind(now())
            .bind(environment_id)
            .execute(&self.pool)
            .await
            .context("marking environment seeded")?;

        Ok(())
    }

    /// Record a failed provisioning attempt.
    pub async fn mark_failed(&self, environment_id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE environments
            SET status = ?, is_running = 0, error_message = ?, updated_at = ?
            WHERE environment_id = ?
            "#,
        )
        .bind(EnvironmentStatus::Failed.to_string())
        .bind(error_message)
        .bind(now())
        .bind(environment_id)
        .execute(&self.pool)
        .await
        .context("marking environment failed")?;

        Ok(())
    }

    /// Move an environment to a status. Returns `false` if the row was not
    /// in the expected status anymore.
    pub async fn transition(
        &self,
        environment_id: &str,
        from: EnvironmentStatus,
        to: EnvironmentStatus,
        is_running: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET status = ?, is_running = ?, updated_at = ?
            WHERE environment_id = ? AND status = ?
            "#,
        )
        .bind(to.to_string())
        .bind(is_running)
        .bind(now())
        .bind(environment_id)
        .bind(from.to_string())
        .execute(&self.pool)
        .await
        .context("updating environment status")?;

        Ok(result.rows_affected() == 1)
    }

    /// Bump the activity timestamp and wake an idle environment.
    pub async fn touch(&self, environment_id: &str) -> Result<bool> {
        let timestamp = now();
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET last_activity_at = ?,
                updated_at = ?,
                status = CASE WHEN status = 'idle' THEN 'ready' ELSE status END
            WHERE environment_id = ?
            "#,
        )
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(environment_id)
        .execute(&self.pool)
        .await
        .context("touching environment")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn update_layout(&self, environment_id: &str, layout: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET layout = ?, updated_at = ?
            WHERE environment_id = ?
            "#,
        )
        .bind(layout)
        .bind(now())
        .bind(environment_id)
        .execute(&self.pool)
        .await
        .context("updating environment layout")?;

        Ok(result.rows_affected() == 1)
    }
}
