//! Dedup ledger of already-delivered trigger events.
//!
//! The ledger is append-only. A claim is an atomic conditional insert: of
//! any number of concurrent claims for the same key exactly one observes
//! [`ClaimOutcome::Claimed`].

use crate::error::LedgerError;
use async_trait::async_trait;
use autoflow_core::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ledger key plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub user_id: UserId,
    pub service_name: String,
    pub external_event_id: String,
    pub scope: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Creates a ledger entry stamped now.
    #[must_use]
    pub fn new(
        user_id: UserId,
        service_name: impl Into<String>,
        external_event_id: impl Into<String>,
        scope: Option<String>,
    ) -> Self {
        Self {
            user_id,
            service_name: service_name.into(),
            external_event_id: external_event_id.into(),
            scope,
            recorded_at: Utc::now(),
        }
    }

    fn key(&self) -> (UserId, String, String) {
        (
            self.user_id,
            self.service_name.clone(),
            self.external_event_id.clone(),
        )
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller recorded the event and owns its delivery.
    Claimed,
    /// The event was delivered before.
    AlreadyClaimed,
}

/// Append-only record of delivered events.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// Atomically records the event unless already present.
    async fn try_claim(&self, event: &ProcessedEvent) -> Result<ClaimOutcome, LedgerError>;
}

/// In-process dedup ledger.
#[derive(Debug, Default)]
pub struct InMemoryDedupLedger {
    entries: RwLock<HashMap<(UserId, String, String), ProcessedEvent>>,
    attempts: AtomicUsize,
}

impl InMemoryDedupLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `try_claim` calls observed, whatever their outcome.
    #[must_use]
    pub fn claim_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> LedgerError {
    LedgerError::StorageFailed {
        reason: "ledger lock poisoned".to_string(),
    }
}

#[async_trait]
impl DedupLedger for InMemoryDedupLedger {
    async fn try_claim(&self, event: &ProcessedEvent) -> Result<ClaimOutcome, LedgerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let key = event.key();
        if entries.contains_key(&key) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        entries.insert(key, event.clone());
        Ok(ClaimOutcome::Claimed)
    }
}
