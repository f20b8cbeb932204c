//! Service integration framework for the autoflow engine.
//!
//! This crate provides:
//!
//! - **Service adapter trait**: the one interface every external service implements
//! - **Credential store**: per-user OAuth tokens, unique per (user, service)
//! - **Dedup ledger**: at-most-once delivery of trigger events
//! - **Lifecycle manager**: timeout-bounded adapter calls with refresh-once recovery

pub mod adapter;
pub mod context;
pub mod credential;
pub mod dedup;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod scripted;

pub use adapter::{
    ActionResult, AdapterInfo, ExternalEvent, RefreshedToken, ServiceAdapter, StepConfig,
    optional_str, required_str,
};
pub use context::{ExecutionContext, UnresolvedPlaceholder};
pub use credential::{Credential, CredentialStore, InMemoryCredentialStore, TokenPayload};
pub use dedup::{ClaimOutcome, DedupLedger, InMemoryDedupLedger, ProcessedEvent};
pub use error::{AdapterError, CredentialError, LedgerError, LifecycleError};
pub use lifecycle::{AdapterOp, CredentialLifecycleManager, FetchEvents, PerformAction};
pub use registry::AdapterRegistry;
pub use scripted::{CallKind, RecordedCall, SCRIPTED_ACTION, SCRIPTED_TRIGGER, ScriptedAdapter};
