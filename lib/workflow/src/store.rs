//! Workflow persistence.

use crate::definition::Workflow;
use crate::error::StoreError;
use async_trait::async_trait;
use autoflow_core::{UserId, WorkflowId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Storage for workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Stores a new workflow.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the id is taken.
    async fn insert(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Overwrites an existing workflow.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the workflow does not exist.
    async fn update(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Sets only the enabled flag; returns the updated workflow, or `None`
    /// if it does not exist.
    async fn set_enabled(
        &self,
        id: WorkflowId,
        enabled: bool,
    ) -> Result<Option<Workflow>, StoreError>;

    /// Loads a workflow.
    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError>;

    /// Lists a user's workflows, oldest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Workflow>, StoreError>;

    /// Lists every enabled workflow.
    async fn list_enabled(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Removes a workflow; returns whether it existed.
    async fn delete(&self, id: WorkflowId) -> Result<bool, StoreError>;
}

/// In-process workflow store.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut workflows: Vec<Workflow>) -> Vec<Workflow> {
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        workflows
    }
}

fn poisoned() -> StoreError {
    StoreError::StorageFailed {
        reason: "workflow map lock poisoned".to_string(),
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write().map_err(|_| poisoned())?;
        if workflows.contains_key(&workflow.id) {
            return Err(StoreError::AlreadyExists {
                workflow_id: workflow.id,
            });
        }
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write().map_err(|_| poisoned())?;
        match workflows.get_mut(&workflow.id) {
            Some(stored) => {
                *stored = workflow.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                workflow_id: workflow.id,
            }),
        }
    }

    async fn set_enabled(
        &self,
        id: WorkflowId,
        enabled: bool,
    ) -> Result<Option<Workflow>, StoreError> {
        let mut workflows = self.workflows.write().map_err(|_| poisoned())?;
        Ok(workflows.get_mut(&id).map(|stored| {
            stored.set_enabled(enabled);
            stored.clone()
        }))
    }

    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let workflows = self.workflows.read().map_err(|_| poisoned())?;
        Ok(workflows.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Workflow>, StoreError> {
        let workflows = self.workflows.read().map_err(|_| poisoned())?;
        Ok(Self::sorted(
            workflows
                .values()
                .filter(|w| w.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_enabled(&self) -> Result<Vec<Workflow>, StoreError> {
        let workflows = self.workflows.read().map_err(|_| poisoned())?;
        Ok(Self::sorted(
            workflows.values().filter(|w| w.enabled).cloned().collect(),
        ))
    }

    async fn delete(&self, id: WorkflowId) -> Result<bool, StoreError> {
        let mut workflows = self.workflows.write().map_err(|_| poisoned())?;
        Ok(workflows.remove(&id).is_some())
    }
}
