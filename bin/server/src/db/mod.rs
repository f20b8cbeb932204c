//! PostgreSQL repositories for the autoflow server.
//!
//! This module provides data access for:
//! - Workflow definitions
//! - Per-user service credentials
//! - The processed-event dedup ledger
//!
//! Each repository implements the matching storage trait so the engine can
//! run on either these or the in-memory stores.

pub mod credential;
pub mod processed_event;
pub mod workflow;

pub use credential::CredentialRepository;
pub use processed_event::ProcessedEventRepository;
pub use workflow::WorkflowRepository;

use std::str::FromStr;

/// Parses an id column, reporting failures as decode errors.
fn decode_id<T>(column: &str, value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(value).map_err(|e| {
        sqlx::Error::Decode(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid {column} '{value}': {e}"),
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_core::{UserId, WorkflowId};

    #[test]
    fn decode_id_accepts_stored_form() {
        let id = WorkflowId::new();
        let decoded: WorkflowId = decode_id("id", &id.to_string()).expect("decode");
        assert_eq!(decoded, id);
    }

    #[test]
    fn decode_id_rejects_garbage() {
        let err = decode_id::<UserId>("user_id", "not-a-ulid").expect_err("garbage");
        assert!(matches!(err, sqlx::Error::Decode(_)));
    }
}
