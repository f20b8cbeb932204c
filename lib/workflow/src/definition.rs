//! Workflow definition types.
//!
//! A workflow is one trigger step feeding an ordered chain of action steps,
//! owned by a single user. Definitions arrive as a flat list of steps and are
//! validated into a [`Workflow`]. Apart from the `enabled` toggle a workflow
//! is immutable; an edit replaces its steps wholesale and bumps `version`.

use crate::error::{CapabilityError, ValidationError};
use autoflow_core::{UserId, WorkflowId};
use autoflow_integration::{AdapterRegistry, StepConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a step in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Trigger,
    Action,
}

impl StepType {
    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trigger or action step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_type: StepType,
    pub service_name: String,
    pub event_type: String,
    /// Interpreted by the adapter; the engine only reads the trigger filters.
    #[serde(default)]
    pub configuration: StepConfig,
}

impl Step {
    /// Creates a trigger step with empty configuration.
    #[must_use]
    pub fn trigger(service_name: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self::new(StepType::Trigger, service_name, event_type)
    }

    /// Creates an action step with empty configuration.
    #[must_use]
    pub fn action(service_name: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self::new(StepType::Action, service_name, event_type)
    }

    fn new(
        step_type: StepType,
        service_name: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            step_type,
            service_name: service_name.into(),
            event_type: event_type.into(),
            configuration: StepConfig::new(),
        }
    }

    /// Sets a configuration value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }
}

/// A workflow as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Exactly one trigger and at least one action; actions run in this order.
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Splits the steps into the trigger and the ordered actions.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for the first structural problem found.
    pub fn validate(&self) -> Result<(Step, Vec<Step>), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        for (step_index, step) in self.steps.iter().enumerate() {
            if step.service_name.trim().is_empty() {
                return Err(ValidationError::EmptyField {
                    step_index,
                    field: "service_name",
                });
            }
            if step.event_type.trim().is_empty() {
                return Err(ValidationError::EmptyField {
                    step_index,
                    field: "event_type",
                });
            }
        }

        let (triggers, actions): (Vec<&Step>, Vec<&Step>) = self
            .steps
            .iter()
            .partition(|s| s.step_type == StepType::Trigger);

        match triggers.len() {
            0 => return Err(ValidationError::MissingTrigger),
            1 => {}
            count => return Err(ValidationError::MultipleTriggers { count }),
        }
        if actions.is_empty() {
            return Err(ValidationError::NoActions);
        }

        Ok((
            triggers[0].clone(),
            actions.into_iter().cloned().collect(),
        ))
    }
}

/// A validated, stored workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub trigger: Step,
    pub actions: Vec<Step>,
    pub enabled: bool,
    /// Starts at 1; bumped by every replacement.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Validates a definition into a new, enabled workflow.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the definition is malformed.
    pub fn from_definition(definition: WorkflowDefinition) -> Result<Self, ValidationError> {
        let (trigger, actions) = definition.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: WorkflowId::new(),
            user_id: definition.user_id,
            name: definition.name.trim().to_string(),
            description: definition.description,
            trigger,
            actions,
            enabled: true,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces name and steps with those of `definition`.
    ///
    /// Identity, owner, `enabled` and `created_at` are kept.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the definition is malformed; the
    /// workflow is left untouched.
    pub fn replace(&mut self, definition: WorkflowDefinition) -> Result<(), ValidationError> {
        let (trigger, actions) = definition.validate()?;
        self.name = definition.name.trim().to_string();
        self.description = definition.description;
        self.trigger = trigger;
        self.actions = actions;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Toggles the workflow.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.updated_at = Utc::now();
    }

    /// All steps, trigger first.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        std::iter::once(&self.trigger).chain(self.actions.iter())
    }

    /// Checks every step against the registered adapters.
    ///
    /// # Errors
    ///
    /// Returns the first step whose service or event type is not offered.
    pub fn check_capabilities(&self, registry: &AdapterRegistry) -> Result<(), CapabilityError> {
        for step in self.steps() {
            let adapter =
                registry
                    .get(&step.service_name)
                    .ok_or_else(|| CapabilityError::UnknownService {
                        service_name: step.service_name.clone(),
                    })?;
            let info = adapter.info();
            let supported = match step.step_type {
                StepType::Trigger => info.supports_trigger(&step.event_type),
                StepType::Action => info.supports_action(&step.event_type),
            };
            if !supported {
                return Err(CapabilityError::UnknownEvent {
                    service_name: step.service_name.clone(),
                    event_type: step.event_type.clone(),
                    role: step.step_type.as_str(),
                });
            }
        }
        Ok(())
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub enabled: bool,
    pub version: u32,
    pub trigger_service: String,
    pub action_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name.clone(),
            enabled: workflow.enabled,
            version: workflow.version,
            trigger_service: workflow.trigger.service_name.clone(),
            action_count: workflow.actions.len(),
            updated_at: workflow.updated_at,
        }
    }
}
