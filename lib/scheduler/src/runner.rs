//! Workflow runner.
//!
//! Drives every registered workflow through poll cycles:
//! - A cycle polls the trigger, then executes the actions for each accepted
//!   event in provider order
//! - At most one cycle runs per workflow; an overlapping attempt is skipped
//! - Cycles for different workflows run in parallel, one task each per tick
//!
//! Per-workflow state moves `Idle -> Polling -> Executing -> Idle`, or to
//! `Disabled` when the workflow is switched off. A disabled workflow's
//! in-flight cycle runs to completion.

use crate::error::RunnerError;
use crate::poller::{PollSummary, TriggerPoller};
use crate::schedule::PollSchedule;
use autoflow_core::WorkflowId;
use autoflow_workflow::{ActionExecutor, ExecutionResult, Workflow};
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default number of runs kept per workflow.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Where a workflow is in its cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Polling,
    /// Running the action chain for one event.
    Executing { event_id: String },
    Disabled,
}

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another cycle for the workflow is in flight.
    Overlapping,
    /// The workflow is disabled.
    Disabled,
}

/// What one completed cycle did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub workflow_id: WorkflowId,
    pub poll: PollSummary,
    /// One result per accepted event, in execution order.
    pub runs: Vec<ExecutionResult>,
}

/// Result of asking for a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Ran(CycleReport),
    Skipped { reason: SkipReason },
}

impl CycleOutcome {
    #[must_use]
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Ran(report) => Some(report),
            Self::Skipped { .. } => None,
        }
    }
}

/// Observable status of a registered workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: WorkflowId,
    pub version: u32,
    pub enabled: bool,
    pub state: RunnerState,
    pub last_poll_at: Option<DateTime<Utc>>,
    /// Counters of the last successful poll.
    pub last_poll: Option<PollSummary>,
    /// Error of the last poll, cleared by the next successful one.
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Most recent runs, oldest first.
    pub recent_runs: Vec<ExecutionResult>,
}

struct SlotInner {
    workflow: Workflow,
    state: RunnerState,
    last_poll_at: Option<DateTime<Utc>>,
    last_poll: Option<PollSummary>,
    last_error: Option<String>,
    consecutive_failures: u32,
    history: VecDeque<ExecutionResult>,
}

struct Slot {
    poll_guard: tokio::sync::Mutex<()>,
    inner: Mutex<SlotInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn resting_state(enabled: bool) -> RunnerState {
    if enabled {
        RunnerState::Idle
    } else {
        RunnerState::Disabled
    }
}

impl Slot {
    fn new(workflow: Workflow) -> Self {
        Self {
            poll_guard: tokio::sync::Mutex::new(()),
            inner: Mutex::new(SlotInner {
                state: resting_state(workflow.enabled),
                workflow,
                last_poll_at: None,
                last_poll: None,
                last_error: None,
                consecutive_failures: 0,
                history: VecDeque::new(),
            }),
        }
    }

    fn is_enabled(&self) -> bool {
        lock(&self.inner).workflow.enabled
    }

    fn replace(&self, workflow: Workflow) {
        let mut inner = lock(&self.inner);
        let enabled = workflow.enabled;
        inner.workflow = workflow;
        let busy = matches!(
            inner.state,
            RunnerState::Polling | RunnerState::Executing { .. }
        );
        if !busy || !enabled {
            inner.state = resting_state(enabled);
        }
    }

    fn set_enabled(&self, enabled: bool) {
        let mut inner = lock(&self.inner);
        inner.workflow.set_enabled(enabled);
        match (&inner.state, enabled) {
            (_, false) => inner.state = RunnerState::Disabled,
            (RunnerState::Disabled, true) => inner.state = RunnerState::Idle,
            _ => {}
        }
    }

    /// Enters `Polling` and snapshots the workflow, unless disabled.
    fn begin_cycle(&self) -> Option<Workflow> {
        let mut inner = lock(&self.inner);
        if !inner.workflow.enabled {
            return None;
        }
        inner.state = RunnerState::Polling;
        Some(inner.workflow.clone())
    }

    fn transition(&self, next: RunnerState) {
        let mut inner = lock(&self.inner);
        inner.state = if inner.workflow.enabled {
            next
        } else {
            RunnerState::Disabled
        };
    }

    fn record_poll(&self, at: DateTime<Utc>, result: Result<PollSummary, String>) {
        let mut inner = lock(&self.inner);
        inner.last_poll_at = Some(at);
        match result {
            Ok(summary) => {
                inner.last_poll = Some(summary);
                inner.last_error = None;
                inner.consecutive_failures = 0;
            }
            Err(error) => {
                inner.last_error = Some(error);
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            }
        }
    }

    fn push_run(&self, run: ExecutionResult, limit: usize) {
        let mut inner = lock(&self.inner);
        inner.history.push_back(run);
        while inner.history.len() > limit {
            inner.history.pop_front();
        }
    }

    fn status(&self) -> WorkflowStatus {
        let inner = lock(&self.inner);
        WorkflowStatus {
            workflow_id: inner.workflow.id,
            version: inner.workflow.version,
            enabled: inner.workflow.enabled,
            state: inner.state.clone(),
            last_poll_at: inner.last_poll_at,
            last_poll: inner.last_poll,
            last_error: inner.last_error.clone(),
            consecutive_failures: inner.consecutive_failures,
            recent_runs: inner.history.iter().cloned().collect(),
        }
    }
}

/// Runs poll cycles for registered workflows.
pub struct WorkflowRunner {
    poller: TriggerPoller,
    executor: ActionExecutor,
    slots: RwLock<HashMap<WorkflowId, Arc<Slot>>>,
    history_limit: usize,
}

impl WorkflowRunner {
    /// Creates a runner keeping `history_limit` runs per workflow.
    #[must_use]
    pub fn new(poller: TriggerPoller, executor: ActionExecutor, history_limit: usize) -> Self {
        Self {
            poller,
            executor,
            slots: RwLock::new(HashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    fn slot(&self, id: WorkflowId) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Registers a workflow, or swaps in a new version of one.
    ///
    /// An in-flight cycle keeps running the version it started with.
    pub fn register(&self, workflow: Workflow) {
        let id = workflow.id;
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get(&id) {
            Some(slot) => slot.replace(workflow),
            None => {
                slots.insert(id, Arc::new(Slot::new(workflow)));
            }
        }
        debug!(workflow_id = %id, "workflow registered");
    }

    /// Enables or disables a workflow.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if the workflow is unknown.
    pub fn set_enabled(&self, id: WorkflowId, enabled: bool) -> Result<(), Report<RunnerError>> {
        let slot = self
            .slot(id)
            .ok_or(RunnerError::NotRegistered { workflow_id: id })?;
        slot.set_enabled(enabled);
        info!(workflow_id = %id, enabled, "workflow toggled");
        Ok(())
    }

    /// Removes a workflow once no cycle for it is in flight.
    ///
    /// Returns false if the workflow was not registered.
    pub async fn remove(&self, id: WorkflowId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        slot.set_enabled(false);
        let _guard = slot.poll_guard.lock().await;
        let removed = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        debug!(workflow_id = %id, removed, "workflow removed");
        removed
    }

    /// Current status of a workflow.
    #[must_use]
    pub fn status(&self, id: WorkflowId) -> Option<WorkflowStatus> {
        self.slot(id).map(|slot| slot.status())
    }

    /// Ids of workflows eligible for the next tick.
    #[must_use]
    pub fn due_workflows(&self) -> Vec<WorkflowId> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| slot.is_enabled())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Runs one cycle for a workflow.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` for an unknown workflow and `Poll` if the
    /// trigger fetch failed. Action failures are reported in the runs, not
    /// as errors.
    #[instrument(skip(self), fields(workflow_id = %id))]
    pub async fn run_cycle(&self, id: WorkflowId) -> Result<CycleOutcome, Report<RunnerError>> {
        let slot = self
            .slot(id)
            .ok_or(RunnerError::NotRegistered { workflow_id: id })?;

        if !slot.is_enabled() {
            return Ok(CycleOutcome::Skipped {
                reason: SkipReason::Disabled,
            });
        }
        let Ok(_guard) = slot.poll_guard.try_lock() else {
            debug!("cycle already in flight, skipping");
            return Ok(CycleOutcome::Skipped {
                reason: SkipReason::Overlapping,
            });
        };
        let Some(workflow) = slot.begin_cycle() else {
            return Ok(CycleOutcome::Skipped {
                reason: SkipReason::Disabled,
            });
        };

        let polled_at = Utc::now();
        let outcome = match self.poller.poll(&workflow).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(error = %error, "poll failed");
                slot.record_poll(polled_at, Err(error.to_string()));
                slot.transition(RunnerState::Idle);
                return Err(RunnerError::Poll {
                    workflow_id: id,
                    error,
                }
                .into());
            }
        };
        slot.record_poll(polled_at, Ok(outcome.summary));

        let mut runs = Vec::with_capacity(outcome.events.len());
        for event in outcome.events {
            slot.transition(RunnerState::Executing {
                event_id: event.id.clone(),
            });
            let run = self.executor.execute(&workflow, event).await;
            slot.push_run(run.clone(), self.history_limit);
            runs.push(run);
        }
        slot.transition(RunnerState::Idle);

        if !runs.is_empty() {
            info!(
                runs = runs.len(),
                failed = runs.iter().filter(|r| !r.is_success()).count(),
                "cycle complete"
            );
        }
        Ok(CycleOutcome::Ran(CycleReport {
            workflow_id: id,
            poll: outcome.summary,
            runs,
        }))
    }

    /// Starts the polling loop.
    ///
    /// Every tick spawns a cycle for each enabled workflow. On cancellation
    /// the loop stops ticking and waits for in-flight cycles.
    pub fn spawn(self: Arc<Self>, schedule: PollSchedule, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?schedule.interval(), "workflow runner started");
            let mut ticker = schedule.ticker();
            let mut cycles = JoinSet::new();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        while cycles.try_join_next().is_some() {}
                        for id in self.due_workflows() {
                            let runner = Arc::clone(&self);
                            cycles.spawn(async move {
                                if let Err(err) = runner.run_cycle(id).await {
                                    warn!(workflow_id = %id, error = %err, "cycle failed");
                                }
                            });
                        }
                    }
                }
            }
            info!(in_flight = cycles.len(), "workflow runner stopping");
            while cycles.join_next().await.is_some() {}
        })
    }
}
