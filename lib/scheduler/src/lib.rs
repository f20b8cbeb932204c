//! Trigger polling and workflow scheduling for autoflow.
//!
//! This crate decides when workflows run:
//! - [`TriggerPoller`] fetches, deduplicates and filters trigger events
//! - [`WorkflowRunner`] runs per-workflow cycles with overlap suppression
//! - [`PollSchedule`] paces the runner's polling loop

pub mod error;
pub mod filter;
pub mod poller;
pub mod runner;
pub mod schedule;

pub use error::{PollError, RunnerError, ScheduleError};
pub use filter::TriggerFilter;
pub use poller::{PollOutcome, PollSummary, TriggerPoller};
pub use runner::{
    CycleOutcome, CycleReport, DEFAULT_HISTORY_LIMIT, RunnerState, SkipReason, WorkflowRunner,
    WorkflowStatus,
};
pub use schedule::PollSchedule;
