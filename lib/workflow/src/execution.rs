//! Records of action chain executions.
//!
//! One [`ExecutionResult`] is produced per accepted trigger event. Results
//! are kept in memory by the runner for the status surface; they are not
//! durable.

use autoflow_core::{WorkflowId, WorkflowRunId};
use autoflow_integration::{AdapterError, ExecutionContext, LifecycleError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The step names a service with no registered adapter.
    UnknownService,
    /// The user has no credential for the step's service.
    CredentialNotFound,
    /// The credential was refused and could not be refreshed.
    InvalidCredential,
    /// The provider rejected the token even after a refresh.
    Auth,
    /// The step configuration is unusable.
    Configuration,
    /// The provider call failed.
    Action,
    /// The call exceeded the configured bound.
    Timeout,
    /// The credential store failed.
    Storage,
}

impl From<&LifecycleError> for FailureKind {
    fn from(err: &LifecycleError) -> Self {
        match err {
            LifecycleError::UnknownService { .. } => Self::UnknownService,
            LifecycleError::CredentialNotFound { .. } => Self::CredentialNotFound,
            LifecycleError::InvalidCredential { .. } => Self::InvalidCredential,
            LifecycleError::Adapter(AdapterError::Unauthorized { .. }) => Self::Auth,
            LifecycleError::Adapter(
                AdapterError::InvalidConfig { .. } | AdapterError::UnsupportedEvent { .. },
            ) => Self::Configuration,
            LifecycleError::Adapter(_) => Self::Action,
            LifecycleError::Timeout { .. } => Self::Timeout,
            LifecycleError::Store(_) => Self::Storage,
        }
    }
}

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every action step succeeded.
    Completed,
    /// Step `step_index` failed; later steps never ran.
    Failed {
        step_index: usize,
        kind: FailureKind,
        message: String,
    },
}

/// Outcome of executing a workflow's actions for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    /// Provider id of the triggering event.
    pub event_id: String,
    pub status: RunStatus,
    /// Event plus the output of every completed step.
    pub context: ExecutionContext,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Returns true if every step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }

    /// Index of the failed step, if any.
    #[must_use]
    pub fn failed_step(&self) -> Option<usize> {
        match self.status {
            RunStatus::Failed { step_index, .. } => Some(step_index),
            RunStatus::Completed => None,
        }
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
