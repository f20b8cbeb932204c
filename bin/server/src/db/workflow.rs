//! Workflow repository.

use super::decode_id;
use async_trait::async_trait;
use autoflow_core::{UserId, WorkflowId};
use autoflow_workflow::{Step, StoreError, Workflow, WorkflowStore};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    user_id: String,
    name: String,
    description: Option<String>,
    trigger_step: Json<Step>,
    action_steps: Json<Vec<Step>>,
    enabled: bool,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_workflow(self) -> Result<Workflow, sqlx::Error> {
        Ok(Workflow {
            id: decode_id("workflow id", &self.id)?,
            user_id: decode_id("user id", &self.user_id)?,
            name: self.name,
            description: self.description,
            trigger: self.trigger_step.0,
            actions: self.action_steps.0,
            enabled: self.enabled,
            version: u32::try_from(self.version).unwrap_or(1),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn storage_failed(err: sqlx::Error) -> StoreError {
    StoreError::StorageFailed {
        reason: err.to_string(),
    }
}

fn version_column(workflow: &Workflow) -> i32 {
    i32::try_from(workflow.version).unwrap_or(i32::MAX)
}

/// Repository for workflow operations.
#[derive(Clone)]
pub struct WorkflowRepository {
    pool: PgPool,
}

impl WorkflowRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn collect(rows: Vec<WorkflowRow>) -> Result<Vec<Workflow>, StoreError> {
        rows.into_iter()
            .map(|r| r.try_into_workflow().map_err(storage_failed))
            .collect()
    }
}

#[async_trait]
impl WorkflowStore for WorkflowRepository {
    async fn insert(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflows
                (id, user_id, name, description, trigger_step, action_steps,
                 enabled, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.user_id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(Json(&workflow.trigger))
        .bind(Json(&workflow.actions))
        .bind(workflow.enabled)
        .bind(version_column(workflow))
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                workflow_id: workflow.id,
            });
        }
        Ok(())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, description = $3, trigger_step = $4, action_steps = $5,
                enabled = $6, version = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(Json(&workflow.trigger))
        .bind(Json(&workflow.actions))
        .bind(workflow.enabled)
        .bind(version_column(workflow))
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                workflow_id: workflow.id,
            });
        }
        Ok(())
    }

    async fn set_enabled(
        &self,
        id: WorkflowId,
        enabled: bool,
    ) -> Result<Option<Workflow>, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            UPDATE workflows
            SET enabled = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, user_id, name, description, trigger_step, action_steps,
                      enabled, version, created_at, updated_at
            "#,
        )
        .bind(id.to_string())
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        row.map(|r| r.try_into_workflow().map_err(storage_failed))
            .transpose()
    }

    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, description, trigger_step, action_steps,
                   enabled, version, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        row.map(|r| r.try_into_workflow().map_err(storage_failed))
            .transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Workflow>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, description, trigger_step, action_steps,
                   enabled, version, created_at, updated_at
            FROM workflows
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_failed)?;

        Self::collect(rows)
    }

    async fn list_enabled(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, description, trigger_step, action_steps,
                   enabled, version, created_at, updated_at
            FROM workflows
            WHERE enabled
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_failed)?;

        Self::collect(rows)
    }

    async fn delete(&self, id: WorkflowId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(result.rows_affected() > 0)
    }
}
