//! Engine facade.
//!
//! Ties the stores, the adapter registry and the workflow runner together
//! behind the operations the HTTP layer exposes. Every operation returns a
//! rootcause report whose current context is an [`EngineError`].

use crate::error::EngineError;
use autoflow_core::{UserId, WorkflowId};
use autoflow_integration::{
    AdapterRegistry, Credential, CredentialError, CredentialLifecycleManager, CredentialStore,
    DedupLedger, TokenPayload,
};
use autoflow_scheduler::{
    CycleOutcome, PollSchedule, RunnerState, TriggerPoller, WorkflowRunner, WorkflowStatus,
};
use autoflow_workflow::{ActionExecutor, Workflow, WorkflowDefinition, WorkflowStore};
use chrono::{DateTime, Utc};
use rootcause::prelude::ResultExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub type EngineResult<T> = autoflow_core::Result<T, EngineError>;

/// Runtime limits for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound on every adapter call.
    pub call_timeout: Duration,
    /// Runs kept per workflow.
    pub history_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            history_limit: autoflow_scheduler::DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Connection state of one service for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationStatus {
    pub service_name: String,
    pub display_name: String,
    pub connected: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
    pub can_refresh: bool,
    pub trigger_events: Vec<String>,
    pub action_events: Vec<String>,
}

/// Credential view without token material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedCredential {
    pub user_id: UserId,
    pub service_name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub can_refresh: bool,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Credential> for ConnectedCredential {
    fn from(credential: &Credential) -> Self {
        Self {
            user_id: credential.user_id,
            service_name: credential.service_name.clone(),
            expires_at: credential.expires_at,
            can_refresh: credential.can_refresh(),
            connected_at: credential.created_at,
            updated_at: credential.updated_at,
        }
    }
}

/// Serializes mutations of one workflow across store and runner.
#[derive(Debug, Default)]
struct WorkflowLocks {
    locks: Mutex<HashMap<WorkflowId, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkflowLocks {
    async fn lock(&self, workflow_id: WorkflowId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(workflow_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the lock entry of a deleted workflow unless someone is waiting
    /// on it. Call while holding the lock.
    fn forget(&self, workflow_id: WorkflowId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in the caller's guard.
        if locks
            .get(&workflow_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&workflow_id);
        }
    }
}

/// The workflow automation engine.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<AdapterRegistry>,
    workflows: Arc<dyn WorkflowStore>,
    credentials: Arc<dyn CredentialStore>,
    runner: Arc<WorkflowRunner>,
    locks: Arc<WorkflowLocks>,
}

impl Engine {
    /// Assembles an engine over the given stores.
    #[must_use]
    pub fn new(
        registry: AdapterRegistry,
        workflows: Arc<dyn WorkflowStore>,
        credentials: Arc<dyn CredentialStore>,
        ledger: Arc<dyn DedupLedger>,
        settings: EngineSettings,
    ) -> Self {
        let registry = Arc::new(registry);
        let lifecycle = CredentialLifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&credentials),
            settings.call_timeout,
        );
        let runner = Arc::new(WorkflowRunner::new(
            TriggerPoller::new(lifecycle.clone(), ledger),
            ActionExecutor::new(lifecycle),
            settings.history_limit,
        ));
        Self {
            registry,
            workflows,
            credentials,
            runner,
            locks: Arc::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Registers every stored enabled workflow with the runner.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the workflows cannot be listed.
    pub async fn load_workflows(&self) -> EngineResult<usize> {
        let workflows = self
            .workflows
            .list_enabled()
            .await
            .context(EngineError::Storage {
                operation: "load workflows",
            })?;
        let count = workflows.len();
        for workflow in workflows {
            self.runner.register(workflow);
        }
        info!(count, "workflows loaded");
        Ok(count)
    }

    /// Starts the background polling loop.
    pub fn start(&self, schedule: PollSchedule, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.runner).spawn(schedule, cancel)
    }

    async fn load(&self, workflow_id: WorkflowId) -> EngineResult<Workflow> {
        self.workflows
            .get(workflow_id)
            .await
            .context(EngineError::Storage {
                operation: "load workflow",
            })?
            .ok_or_else(|| EngineError::WorkflowNotFound { workflow_id }.into())
    }

    /// Validates and stores a new workflow, enabled.
    ///
    /// # Errors
    ///
    /// Returns `InvalidWorkflow` for a malformed definition and
    /// `UnknownService` or `UnsupportedStep` when a step names a capability
    /// no adapter offers.
    #[instrument(skip_all, fields(user_id = %definition.user_id))]
    pub async fn submit_workflow(&self, definition: WorkflowDefinition) -> EngineResult<WorkflowId> {
        let workflow = Workflow::from_definition(definition).map_err(EngineError::from)?;
        workflow
            .check_capabilities(&self.registry)
            .map_err(EngineError::from)?;

        self.workflows
            .insert(&workflow)
            .await
            .context(EngineError::Storage {
                operation: "insert workflow",
            })?;
        let workflow_id = workflow.id;
        self.runner.register(workflow);
        info!(%workflow_id, "workflow submitted");
        Ok(workflow_id)
    }

    /// Replaces a workflow's definition, bumping its version.
    ///
    /// # Errors
    ///
    /// As [`submit_workflow`](Self::submit_workflow), plus
    /// `WorkflowNotFound` if the workflow does not exist or belongs to
    /// another user.
    #[instrument(skip(self, definition))]
    pub async fn replace_workflow(
        &self,
        workflow_id: WorkflowId,
        definition: WorkflowDefinition,
    ) -> EngineResult<Workflow> {
        let _guard = self.locks.lock(workflow_id).await;
        let mut workflow = self.load(workflow_id).await?;
        if workflow.user_id != definition.user_id {
            return Err(EngineError::WorkflowNotFound { workflow_id }.into());
        }
        workflow.replace(definition).map_err(EngineError::from)?;
        workflow
            .check_capabilities(&self.registry)
            .map_err(EngineError::from)?;

        self.workflows
            .update(&workflow)
            .await
            .context(EngineError::Storage {
                operation: "update workflow",
            })?;
        self.runner.register(workflow.clone());
        info!(version = workflow.version, "workflow replaced");
        Ok(workflow)
    }

    /// Loads one workflow.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` if it does not exist.
    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> EngineResult<Workflow> {
        self.load(workflow_id).await
    }

    /// Lists a user's workflows, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    pub async fn list_workflows(&self, user_id: UserId) -> EngineResult<Vec<Workflow>> {
        self.workflows
            .list_for_user(user_id)
            .await
            .context(EngineError::Storage {
                operation: "list workflows",
            })
    }

    /// Enables or disables a workflow.
    ///
    /// Disabling stops new cycles; a cycle already in flight finishes.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` if it does not exist.
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, workflow_id: WorkflowId, enabled: bool) -> EngineResult<Workflow> {
        let _guard = self.locks.lock(workflow_id).await;
        let workflow = self
            .workflows
            .set_enabled(workflow_id, enabled)
            .await
            .context(EngineError::Storage {
                operation: "toggle workflow",
            })?
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;
        self.runner.register(workflow.clone());
        info!(enabled, "workflow toggled");
        Ok(workflow)
    }

    /// Deletes a workflow once no cycle for it is in flight.
    ///
    /// The stored row goes first so no later registration can resurrect the
    /// workflow. Returns false if the workflow did not exist.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, workflow_id: WorkflowId) -> EngineResult<bool> {
        let _guard = self.locks.lock(workflow_id).await;
        let deleted = self
            .workflows
            .delete(workflow_id)
            .await
            .context(EngineError::Storage {
                operation: "delete workflow",
            })?;
        self.runner.remove(workflow_id).await;
        self.locks.forget(workflow_id);
        if deleted {
            info!("workflow deleted");
        }
        Ok(deleted)
    }

    /// Stores the credential for (user, service), replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `UnknownService` if no adapter is registered for the service
    /// and `InvalidCredential` for an unusable token payload.
    #[instrument(skip(self, payload))]
    pub async fn connect_credential(
        &self,
        user_id: UserId,
        service_name: &str,
        payload: TokenPayload,
    ) -> EngineResult<ConnectedCredential> {
        if self.registry.get(service_name).is_none() {
            return Err(EngineError::UnknownService {
                service_name: service_name.to_string(),
            }
            .into());
        }
        let credential =
            Credential::from_payload(user_id, service_name, payload).map_err(|err| match err {
                CredentialError::Invalid { reason } => EngineError::InvalidCredential { reason },
                other => EngineError::InvalidCredential {
                    reason: other.to_string(),
                },
            })?;

        let stored = self
            .credentials
            .upsert(credential)
            .await
            .context(EngineError::Storage {
                operation: "store credential",
            })?;
        info!("credential connected");
        Ok(ConnectedCredential::from(&stored))
    }

    /// Removes the credential for (user, service).
    ///
    /// Returns false if none was stored.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    #[instrument(skip(self))]
    pub async fn disconnect_credential(
        &self,
        user_id: UserId,
        service_name: &str,
    ) -> EngineResult<bool> {
        let removed = self
            .credentials
            .delete(user_id, service_name)
            .await
            .context(EngineError::Storage {
                operation: "delete credential",
            })?;
        if removed {
            info!("credential disconnected");
        }
        Ok(removed)
    }

    /// Reports, per registered service, whether the user is connected.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the credential store fails.
    pub async fn integration_status(&self, user_id: UserId) -> EngineResult<Vec<IntegrationStatus>> {
        let credentials = self
            .credentials
            .list_for_user(user_id)
            .await
            .context(EngineError::Storage {
                operation: "list credentials",
            })?;

        Ok(self
            .registry
            .infos()
            .into_iter()
            .map(|info| {
                let credential = credentials
                    .iter()
                    .find(|c| c.service_name == info.service_name);
                IntegrationStatus {
                    connected: credential.is_some(),
                    expires_at: credential.and_then(|c| c.expires_at),
                    needs_refresh: credential.is_some_and(Credential::needs_refresh),
                    can_refresh: credential.is_some_and(Credential::can_refresh),
                    service_name: info.service_name,
                    display_name: info.display_name,
                    trigger_events: info.trigger_events,
                    action_events: info.action_events,
                }
            })
            .collect())
    }

    /// Runner state, last poll and recent runs of a workflow.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` if it does not exist.
    pub async fn workflow_status(&self, workflow_id: WorkflowId) -> EngineResult<WorkflowStatus> {
        if let Some(status) = self.runner.status(workflow_id) {
            return Ok(status);
        }
        // Disabled workflows are not loaded into the runner at startup.
        let workflow = self.load(workflow_id).await?;
        Ok(WorkflowStatus {
            workflow_id,
            version: workflow.version,
            enabled: workflow.enabled,
            state: if workflow.enabled {
                RunnerState::Idle
            } else {
                RunnerState::Disabled
            },
            last_poll_at: None,
            last_poll: None,
            last_error: None,
            consecutive_failures: 0,
            recent_runs: Vec::new(),
        })
    }

    /// Runs one cycle now, with the same overlap suppression as scheduled
    /// cycles.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` if it does not exist and `CycleFailed` if
    /// the trigger poll failed.
    #[instrument(skip(self))]
    pub async fn run_now(&self, workflow_id: WorkflowId) -> EngineResult<CycleOutcome> {
        {
            let _guard = self.locks.lock(workflow_id).await;
            if self.runner.status(workflow_id).is_none() {
                let workflow = self.load(workflow_id).await?;
                self.runner.register(workflow);
            }
        }
        self.runner
            .run_cycle(workflow_id)
            .await
            .context(EngineError::CycleFailed { workflow_id })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
