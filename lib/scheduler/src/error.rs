//! Error types for the scheduler crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ScheduleError`: invalid polling schedules
//! - `PollError`: a trigger fetch failed
//! - `RunnerError`: runner-level failures, wrapped for context by callers

use autoflow_core::WorkflowId;
use autoflow_integration::LifecycleError;
use std::fmt;

/// Errors from schedule construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The polling interval is unusable.
    InvalidInterval { reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { reason } => write!(f, "invalid poll interval: {reason}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// A trigger poll could not fetch events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollError {
    pub service_name: String,
    pub event_type: String,
    pub source: LifecycleError,
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "polling {}/{} failed: {}",
            self.service_name, self.event_type, self.source
        )
    }
}

impl std::error::Error for PollError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Errors from runner operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// The workflow is not registered with the runner.
    NotRegistered { workflow_id: WorkflowId },
    /// The poll pass of a cycle failed; no actions ran.
    Poll {
        workflow_id: WorkflowId,
        error: PollError,
    },
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered { workflow_id } => {
                write!(f, "workflow not registered with runner: {workflow_id}")
            }
            Self::Poll { workflow_id, error } => {
                write!(f, "cycle for workflow {workflow_id} failed: {error}")
            }
        }
    }
}

impl std::error::Error for RunnerError {}
