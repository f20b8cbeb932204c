//! Action executor.
//!
//! Runs a workflow's action steps for one trigger event:
//! 1. Seeds an execution context with the event
//! 2. Performs each action in declared order through the lifecycle manager
//! 3. Records each result in the context under its step index
//! 4. Stops at the first failure
//!
//! Execution is not transactional: effects of completed steps stay in place
//! when a later step fails.

use crate::definition::Workflow;
use crate::execution::{ExecutionResult, FailureKind, RunStatus};
use autoflow_core::WorkflowRunId;
use autoflow_integration::{CredentialLifecycleManager, ExecutionContext, ExternalEvent};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

/// Executes action chains.
#[derive(Clone)]
pub struct ActionExecutor {
    lifecycle: CredentialLifecycleManager,
}

impl ActionExecutor {
    /// Creates an executor calling adapters through `lifecycle`.
    #[must_use]
    pub fn new(lifecycle: CredentialLifecycleManager) -> Self {
        Self { lifecycle }
    }

    /// Runs every action of `workflow` for `event`.
    ///
    /// Failures are captured in the returned result rather than propagated.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, event_id = %event.id))]
    pub async fn execute(&self, workflow: &Workflow, event: ExternalEvent) -> ExecutionResult {
        let run_id = WorkflowRunId::new();
        let started_at = Utc::now();
        let event_id = event.id.clone();
        let mut context = ExecutionContext::new(event);
        let mut status = RunStatus::Completed;

        for (step_index, step) in workflow.actions.iter().enumerate() {
            let outcome = self
                .lifecycle
                .perform_action(
                    workflow.user_id,
                    &step.service_name,
                    &step.event_type,
                    &step.configuration,
                    &context,
                )
                .await;

            match outcome {
                Ok(result) => {
                    debug!(step_index, service = %step.service_name, "step completed");
                    context.record(step_index, result);
                }
                Err(err) => {
                    warn!(step_index, service = %step.service_name, error = %err, "step failed");
                    status = RunStatus::Failed {
                        step_index,
                        kind: FailureKind::from(&err),
                        message: err.to_string(),
                    };
                    break;
                }
            }
        }

        let result = ExecutionResult {
            run_id,
            workflow_id: workflow.id,
            event_id,
            status,
            context,
            started_at,
            finished_at: Utc::now(),
        };
        if result.is_success() {
            info!(
                %run_id,
                steps = workflow.actions.len(),
                elapsed_ms = result.duration().num_milliseconds(),
                "run completed"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Step, WorkflowDefinition};
    use autoflow_core::UserId;
    use autoflow_integration::{
        ActionResult, AdapterError, AdapterRegistry, CallKind, Credential, CredentialStore,
        InMemoryCredentialStore, SCRIPTED_ACTION, SCRIPTED_TRIGGER, ScriptedAdapter, TokenPayload,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup(actions: usize) -> (Arc<ScriptedAdapter>, ActionExecutor, Workflow) {
        let adapter = Arc::new(ScriptedAdapter::new("svc"));
        let store = Arc::new(InMemoryCredentialStore::new());
        let user = UserId::new();
        store
            .upsert(
                Credential::from_payload(
                    user,
                    "svc",
                    TokenPayload {
                        access_token: "tok".to_string(),
                        refresh_token: None,
                        expires_in: None,
                        expires_at: None,
                        extra: serde_json::Map::new(),
                    },
                )
                .expect("valid"),
            )
            .await
            .expect("upsert");

        let lifecycle = CredentialLifecycleManager::new(
            Arc::new(AdapterRegistry::new().with(adapter.clone())),
            store,
            Duration::from_secs(5),
        );

        let mut steps = vec![Step::trigger("svc", SCRIPTED_TRIGGER)];
        for i in 0..actions {
            steps.push(Step::action("svc", SCRIPTED_ACTION).with_config("n", i));
        }
        let workflow = Workflow::from_definition(WorkflowDefinition {
            user_id: user,
            name: "chain".to_string(),
            description: None,
            steps,
        })
        .expect("valid");

        (adapter, ActionExecutor::new(lifecycle), workflow)
    }

    fn event() -> ExternalEvent {
        ExternalEvent::new("evt-1", Utc::now())
    }

    #[tokio::test]
    async fn runs_all_steps_in_order() {
        let (adapter, executor, workflow) = setup(3).await;

        let result = executor.execute(&workflow, event()).await;

        assert!(result.is_success());
        assert_eq!(result.event_id, "evt-1");
        assert_eq!(result.context.completed_steps(), 3);
        assert!(result.duration() >= chrono::Duration::zero());
        let order: Vec<_> = adapter
            .calls_of(CallKind::Action)
            .into_iter()
            .map(|c| c.config["n"].clone())
            .collect();
        assert_eq!(order, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn later_steps_see_earlier_outputs() {
        let (adapter, executor, workflow) = setup(2).await;
        adapter.push_action(Ok(ActionResult::new(json!({"url": "u"})).with_external_id("x1")));

        let result = executor.execute(&workflow, event()).await;

        assert!(result.is_success());
        assert_eq!(
            result.context.output(0).and_then(|o| o.external_id.as_deref()),
            Some("x1")
        );
        assert_eq!(result.context.output(1).expect("step 1").data["step"], 1);
    }

    #[tokio::test]
    async fn failure_stops_the_chain() {
        let (adapter, executor, workflow) = setup(3).await;
        adapter.push_action(Ok(ActionResult::new(json!({"ok": true}))));
        adapter.push_action(Err(AdapterError::Remote {
            status: 503,
            reason: "unavailable".to_string(),
        }));

        let result = executor.execute(&workflow, event()).await;

        assert_eq!(result.failed_step(), Some(1));
        match &result.status {
            RunStatus::Failed { kind, message, .. } => {
                assert_eq!(*kind, FailureKind::Action);
                assert!(message.contains("503"));
            }
            RunStatus::Completed => panic!("expected failure"),
        }
        assert!(result.context.output(0).is_some());
        assert!(result.context.output(1).is_none());
        assert_eq!(adapter.calls_of(CallKind::Action).len(), 2);
    }

    #[tokio::test]
    async fn step_without_credential_is_a_visible_failure() {
        let connected = Arc::new(ScriptedAdapter::new("svc"));
        let unconnected = Arc::new(ScriptedAdapter::new("mail"));
        let store = Arc::new(InMemoryCredentialStore::new());
        let user = UserId::new();
        store
            .upsert(
                Credential::from_payload(
                    user,
                    "svc",
                    TokenPayload {
                        access_token: "tok".to_string(),
                        refresh_token: None,
                        expires_in: None,
                        expires_at: None,
                        extra: serde_json::Map::new(),
                    },
                )
                .expect("valid"),
            )
            .await
            .expect("upsert");
        let executor = ActionExecutor::new(CredentialLifecycleManager::new(
            Arc::new(
                AdapterRegistry::new()
                    .with(connected.clone())
                    .with(unconnected.clone()),
            ),
            store,
            Duration::from_secs(5),
        ));
        let workflow = Workflow::from_definition(WorkflowDefinition {
            user_id: user,
            name: "post then mail".to_string(),
            description: None,
            steps: vec![
                Step::trigger("svc", SCRIPTED_TRIGGER),
                Step::action("svc", SCRIPTED_ACTION),
                Step::action("mail", SCRIPTED_ACTION),
            ],
        })
        .expect("valid");

        let result = executor.execute(&workflow, event()).await;

        match &result.status {
            RunStatus::Failed {
                step_index,
                kind,
                message,
            } => {
                assert_eq!(*step_index, 1);
                assert_eq!(*kind, FailureKind::CredentialNotFound);
                assert!(message.contains("mail"));
            }
            RunStatus::Completed => panic!("expected failure"),
        }
        assert!(result.context.output(0).is_some());
        assert_eq!(connected.calls_of(CallKind::Action).len(), 1);
        assert!(unconnected.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_credential_fails_first_step() {
        let (adapter, executor, mut workflow) = setup(1).await;
        workflow.user_id = UserId::new();

        let result = executor.execute(&workflow, event()).await;

        assert_eq!(result.failed_step(), Some(0));
        assert!(matches!(
            result.status,
            RunStatus::Failed {
                kind: FailureKind::CredentialNotFound,
                ..
            }
        ));
        assert!(adapter.calls().is_empty());
    }
}
