//! Workflow model and execution for the autoflow engine.
//!
//! This crate provides:
//!
//! - **Definitions**: one trigger step feeding an ordered chain of action steps
//! - **Workflow store**: persistence trait plus an in-memory implementation
//! - **Action executor**: runs an action chain for one trigger event
//! - **Execution results**: per-run records of what ran and what failed

pub mod definition;
pub mod error;
pub mod execution;
pub mod executor;
pub mod store;

pub use definition::{Step, StepType, Workflow, WorkflowDefinition, WorkflowSummary};
pub use error::{CapabilityError, StoreError, ValidationError};
pub use execution::{ExecutionResult, FailureKind, RunStatus};
pub use executor::ActionExecutor;
pub use store::{InMemoryWorkflowStore, WorkflowStore};
