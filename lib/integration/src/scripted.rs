//! Scripted in-process adapter.
//!
//! Answers from queues filled by the caller and records every call, which
//! makes it the adapter of choice for exercising the lifecycle manager,
//! poller and runner without network access.

use crate::adapter::{
    ActionResult, AdapterInfo, ExternalEvent, RefreshedToken, ServiceAdapter, StepConfig,
};
use crate::context::ExecutionContext;
use crate::credential::Credential;
use crate::error::AdapterError;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Trigger event type every scripted adapter offers.
pub const SCRIPTED_TRIGGER: &str = "new_event";
/// Action event type every scripted adapter offers.
pub const SCRIPTED_ACTION: &str = "act";

/// Which adapter operation a recorded call was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Fetch,
    Action,
}

/// One observed adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub event_type: String,
    pub access_token: String,
    pub config: StepConfig,
    /// Triggering event id, for actions.
    pub event_id: Option<String>,
}

/// Adapter answering from scripted queues.
///
/// With an empty queue, fetches return no events, actions succeed echoing
/// the triggering event id and refreshes issue `refreshed-N` tokens.
pub struct ScriptedAdapter {
    info: AdapterInfo,
    fetches: Mutex<VecDeque<Result<Vec<ExternalEvent>, AdapterError>>>,
    actions: Mutex<VecDeque<Result<ActionResult, AdapterError>>>,
    refreshes: Mutex<VecDeque<Result<RefreshedToken, AdapterError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    refresh_count: AtomicUsize,
    fetch_gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedAdapter {
    /// Creates an adapter registered as `service_name`.
    #[must_use]
    pub fn new(service_name: &str) -> Self {
        Self {
            info: AdapterInfo::new(service_name, service_name)
                .with_trigger(SCRIPTED_TRIGGER)
                .with_action(SCRIPTED_ACTION),
            fetches: Mutex::default(),
            actions: Mutex::default(),
            refreshes: Mutex::default(),
            calls: Mutex::default(),
            refresh_count: AtomicUsize::new(0),
            fetch_gate: None,
            delay: None,
        }
    }

    /// Makes every fetch wait for a permit from `gate` first.
    #[must_use]
    pub fn with_fetch_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.fetch_gate = Some(gate);
        self
    }

    /// Delays every fetch and action.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues the answer for the next fetch.
    pub fn push_fetch(&self, result: Result<Vec<ExternalEvent>, AdapterError>) {
        lock(&self.fetches).push_back(result);
    }

    /// Queues the answer for the next action.
    pub fn push_action(&self, result: Result<ActionResult, AdapterError>) {
        lock(&self.actions).push_back(result);
    }

    /// Queues the answer for the next refresh.
    pub fn push_refresh(&self, result: Result<RefreshedToken, AdapterError>) {
        lock(&self.refreshes).push_back(result);
    }

    /// All calls observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Calls of one kind.
    #[must_use]
    pub fn calls_of(&self, kind: CallKind) -> Vec<RecordedCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of refresh attempts.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }

    fn record(&self, call: RecordedCall) {
        lock(&self.calls).push(call);
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ServiceAdapter for ScriptedAdapter {
    fn info(&self) -> AdapterInfo {
        self.info.clone()
    }

    async fn fetch_events(
        &self,
        credential: &Credential,
        event_type: &str,
        config: &StepConfig,
    ) -> Result<Vec<ExternalEvent>, AdapterError> {
        if !self.info.supports_trigger(event_type) {
            return Err(AdapterError::UnsupportedEvent {
                event_type: event_type.to_string(),
            });
        }
        self.record(RecordedCall {
            kind: CallKind::Fetch,
            event_type: event_type.to_string(),
            access_token: credential.access_token.clone(),
            config: config.clone(),
            event_id: None,
        });

        if let Some(gate) = &self.fetch_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| AdapterError::ConnectionFailed {
                    reason: e.to_string(),
                })?;
        }
        self.pause().await;

        let next = lock(&self.fetches).pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn perform_action(
        &self,
        credential: &Credential,
        event_type: &str,
        config: &StepConfig,
        context: &ExecutionContext,
    ) -> Result<ActionResult, AdapterError> {
        if !self.info.supports_action(event_type) {
            return Err(AdapterError::UnsupportedEvent {
                event_type: event_type.to_string(),
            });
        }
        self.record(RecordedCall {
            kind: CallKind::Action,
            event_type: event_type.to_string(),
            access_token: credential.access_token.clone(),
            config: config.clone(),
            event_id: Some(context.event().id.clone()),
        });
        self.pause().await;

        let next = lock(&self.actions).pop_front();
        next.unwrap_or_else(|| {
            Ok(ActionResult::new(json!({
                "event_id": context.event().id,
                "step": context.completed_steps(),
            })))
        })
    }

    async fn refresh_credential(
        &self,
        credential: &Credential,
    ) -> Result<RefreshedToken, AdapterError> {
        if !credential.can_refresh() {
            return Err(AdapterError::RefreshUnsupported);
        }
        let n = self.refresh_count.fetch_add(1, Ordering::SeqCst) + 1;

        let next = lock(&self.refreshes).pop_front();
        next.unwrap_or_else(|| {
            Ok(RefreshedToken {
                access_token: format!("refreshed-{n}"),
                refresh_token: None,
                expires_at: None,
            })
        })
    }
}
