//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ValidationError`: structural problems in a submitted definition
//! - `CapabilityError`: steps naming services or events nobody provides
//! - `StoreError`: workflow store failures

use autoflow_core::WorkflowId;
use std::fmt;

/// A workflow definition is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The workflow name is empty.
    EmptyName,
    /// No step has `step_type = trigger`.
    MissingTrigger,
    /// More than one step has `step_type = trigger`.
    MultipleTriggers { count: usize },
    /// No step has `step_type = action`.
    NoActions,
    /// A step has an empty service name or event type.
    EmptyField {
        step_index: usize,
        field: &'static str,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "workflow name is empty"),
            Self::MissingTrigger => write!(f, "workflow has no trigger step"),
            Self::MultipleTriggers { count } => {
                write!(f, "workflow has {count} trigger steps, expected exactly one")
            }
            Self::NoActions => write!(f, "workflow has no action steps"),
            Self::EmptyField { step_index, field } => {
                write!(f, "step {step_index} has an empty {field}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A step references a capability no registered adapter offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// No adapter is registered under this name.
    UnknownService { service_name: String },
    /// The adapter exists but has no such trigger or action.
    UnknownEvent {
        service_name: String,
        event_type: String,
        role: &'static str,
    },
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownService { service_name } => {
                write!(f, "unknown service: {service_name}")
            }
            Self::UnknownEvent {
                service_name,
                event_type,
                role,
            } => write!(f, "{service_name} has no {role} event '{event_type}'"),
        }
    }
}

impl std::error::Error for CapabilityError {}

/// Errors from workflow store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Workflow not found.
    NotFound { workflow_id: WorkflowId },
    /// A workflow with this id already exists.
    AlreadyExists { workflow_id: WorkflowId },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::AlreadyExists { workflow_id } => {
                write!(f, "workflow already exists: {workflow_id}")
            }
            Self::StorageFailed { reason } => write!(f, "workflow storage failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::MultipleTriggers { count: 2 };
        assert!(err.to_string().contains("2 trigger steps"));

        let err = ValidationError::EmptyField {
            step_index: 1,
            field: "event_type",
        };
        assert_eq!(err.to_string(), "step 1 has an empty event_type");
    }

    #[test]
    fn capability_error_display() {
        let err = CapabilityError::UnknownEvent {
            service_name: "reddit".to_string(),
            event_type: "new_email".to_string(),
            role: "trigger",
        };
        assert_eq!(err.to_string(), "reddit has no trigger event 'new_email'");
    }

    #[test]
    fn store_error_display() {
        let workflow_id = WorkflowId::new();
        let err = StoreError::NotFound { workflow_id };
        assert!(err.to_string().contains("workflow not found"));
    }
}
