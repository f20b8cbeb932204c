//! Domain error types for engine operations.
//!
//! Caller mistakes carry their cause so it can be reported back. Storage
//! and runner failures are attached as context over the underlying report
//! and surface to callers without internal detail.

use autoflow_core::WorkflowId;
use autoflow_workflow::{CapabilityError, ValidationError};
use std::fmt;

/// Errors from [`Engine`](crate::engine::Engine) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow definition is malformed.
    InvalidWorkflow(ValidationError),
    /// A step names a service or event no adapter provides.
    UnsupportedStep(CapabilityError),
    /// No adapter is registered for the service.
    UnknownService { service_name: String },
    /// The workflow does not exist.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The token payload is unusable.
    InvalidCredential { reason: String },
    /// A store operation failed.
    Storage { operation: &'static str },
    /// A manually requested cycle could not poll its trigger.
    CycleFailed { workflow_id: WorkflowId },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWorkflow(err) => write!(f, "invalid workflow: {err}"),
            Self::UnsupportedStep(err) => write!(f, "unsupported step: {err}"),
            Self::UnknownService { service_name } => write!(f, "unknown service: {service_name}"),
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::InvalidCredential { reason } => write!(f, "invalid credential: {reason}"),
            Self::Storage { operation } => write!(f, "storage failure during {operation}"),
            Self::CycleFailed { workflow_id } => {
                write!(f, "workflow {workflow_id} could not poll its trigger")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidWorkflow(err)
    }
}

impl From<CapabilityError> for EngineError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::UnknownService { service_name } => {
                Self::UnknownService { service_name }
            }
            other => Self::UnsupportedStep(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_service_capability_maps_to_unknown_service() {
        let err = EngineError::from(CapabilityError::UnknownService {
            service_name: "myspace".to_string(),
        });
        assert_eq!(
            err,
            EngineError::UnknownService {
                service_name: "myspace".to_string()
            }
        );
        assert_eq!(err.to_string(), "unknown service: myspace");
    }

    #[test]
    fn validation_error_is_wrapped() {
        let err = EngineError::from(ValidationError::NoActions);
        assert_eq!(err.to_string(), "invalid workflow: workflow has no action steps");
    }
}
