//! Credential repository.
//!
//! Keyed by (user, service). Upserts go through `ON CONFLICT`, so
//! reconnecting replaces the tokens while keeping the original
//! `created_at`.

use super::decode_id;
use async_trait::async_trait;
use autoflow_core::UserId;
use autoflow_integration::{Credential, CredentialError, CredentialStore};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// Row type for credential queries.
#[derive(FromRow)]
struct CredentialRow {
    user_id: String,
    service_name: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    extra: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CredentialRow {
    fn try_into_credential(self) -> Result<Credential, sqlx::Error> {
        Ok(Credential {
            user_id: decode_id("user id", &self.user_id)?,
            service_name: self.service_name,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
            extra: self.extra.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn storage_failed(err: sqlx::Error) -> CredentialError {
    CredentialError::StorageFailed {
        reason: err.to_string(),
    }
}

/// Repository for credential operations.
#[derive(Clone)]
pub struct CredentialRepository {
    pool: PgPool,
}

impl CredentialRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn get(
        &self,
        user_id: UserId,
        service_name: &str,
    ) -> Result<Option<Credential>, CredentialError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            r#"
            SELECT user_id, service_name, access_token, refresh_token, expires_at,
                   extra, created_at, updated_at
            FROM credentials
            WHERE user_id = $1 AND service_name = $2
            "#,
        )
        .bind(user_id.to_string())
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        row.map(|r| r.try_into_credential().map_err(storage_failed))
            .transpose()
    }

    async fn upsert(&self, mut credential: Credential) -> Result<Credential, CredentialError> {
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO credentials
                (user_id, service_name, access_token, refresh_token, expires_at,
                 extra, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, service_name) DO UPDATE
            SET access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                extra = EXCLUDED.extra,
                updated_at = EXCLUDED.updated_at
            RETURNING created_at
            "#,
        )
        .bind(credential.user_id.to_string())
        .bind(&credential.service_name)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(Json(&credential.extra))
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_failed)?;

        credential.created_at = created_at;
        Ok(credential)
    }

    async fn update_tokens(&self, credential: &Credential) -> Result<(), CredentialError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET access_token = $3, refresh_token = $4, expires_at = $5, updated_at = $6
            WHERE user_id = $1 AND service_name = $2
            "#,
        )
        .bind(credential.user_id.to_string())
        .bind(&credential.service_name)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        if result.rows_affected() == 0 {
            return Err(CredentialError::NotFound {
                user_id: credential.user_id,
                service_name: credential.service_name.clone(),
            });
        }
        Ok(())
    }

    async fn delete(&self, user_id: UserId, service_name: &str) -> Result<bool, CredentialError> {
        let result = sqlx::query(
            r#"
            DELETE FROM credentials
            WHERE user_id = $1 AND service_name = $2
            "#,
        )
        .bind(user_id.to_string())
        .bind(service_name)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Credential>, CredentialError> {
        let rows: Vec<CredentialRow> = sqlx::query_as(
            r#"
            SELECT user_id, service_name, access_token, refresh_token, expires_at,
                   extra, created_at, updated_at
            FROM credentials
            WHERE user_id = $1
            ORDER BY service_name ASC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_failed)?;

        rows.into_iter()
            .map(|r| r.try_into_credential().map_err(storage_failed))
            .collect()
    }
}
