//! Dedup ledger repository.

use async_trait::async_trait;
use autoflow_integration::{ClaimOutcome, DedupLedger, LedgerError, ProcessedEvent};
use sqlx::PgPool;

fn storage_failed(err: sqlx::Error) -> LedgerError {
    LedgerError::StorageFailed {
        reason: err.to_string(),
    }
}

/// Repository for the processed-event ledger.
#[derive(Clone)]
pub struct ProcessedEventRepository {
    pool: PgPool,
}

impl ProcessedEventRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupLedger for ProcessedEventRepository {
    async fn try_claim(&self, event: &ProcessedEvent) -> Result<ClaimOutcome, LedgerError> {
        // The primary key makes this a single atomic check-and-insert.
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events
                (user_id, service_name, external_event_id, scope, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(event.user_id.to_string())
        .bind(&event.service_name)
        .bind(&event.external_event_id)
        .bind(&event.scope)
        .bind(event.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(if result.rows_affected() == 1 {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::AlreadyClaimed
        })
    }
}
