//! Trigger poller.
//!
//! One poll pass for a workflow:
//! 1. Fetches candidate events through the lifecycle manager
//! 2. Claims each event in the dedup ledger, in provider order
//! 3. Applies the trigger filters to the claimed events
//!
//! Claiming happens before filtering, so an event rejected by a filter is
//! never offered again even if the filters change later.

use crate::error::PollError;
use crate::filter::TriggerFilter;
use autoflow_integration::{
    ClaimOutcome, CredentialLifecycleManager, DedupLedger, ExternalEvent, LifecycleError,
    ProcessedEvent,
};
use autoflow_workflow::Workflow;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Counters describing one poll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSummary {
    /// Events returned by the provider.
    pub fetched: usize,
    /// Events handed to the executor.
    pub accepted: usize,
    /// Events already claimed by an earlier pass.
    pub duplicates: usize,
    /// Newly claimed events rejected by a filter.
    pub filtered_out: usize,
    /// Events accepted although the ledger write failed.
    pub ledger_failures: usize,
}

/// Result of a poll pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Deduplicated, filtered events in provider order.
    pub events: Vec<ExternalEvent>,
    pub summary: PollSummary,
}

/// Fetches, deduplicates and filters trigger events.
#[derive(Clone)]
pub struct TriggerPoller {
    lifecycle: CredentialLifecycleManager,
    ledger: Arc<dyn DedupLedger>,
}

impl TriggerPoller {
    #[must_use]
    pub fn new(lifecycle: CredentialLifecycleManager, ledger: Arc<dyn DedupLedger>) -> Self {
        Self { lifecycle, ledger }
    }

    /// Runs one poll pass for `workflow`'s trigger.
    ///
    /// # Errors
    ///
    /// Returns `PollError` if the fetch fails or the trigger filters are
    /// malformed. Ledger failures do not abort the pass.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, service = %workflow.trigger.service_name))]
    pub async fn poll(&self, workflow: &Workflow) -> Result<PollOutcome, PollError> {
        let trigger = &workflow.trigger;
        let poll_error = |source: LifecycleError| PollError {
            service_name: trigger.service_name.clone(),
            event_type: trigger.event_type.clone(),
            source,
        };

        let filter = TriggerFilter::from_config(&trigger.configuration)
            .map_err(|e| poll_error(LifecycleError::Adapter(e)))?;

        let fetched = self
            .lifecycle
            .fetch_events(
                workflow.user_id,
                &trigger.service_name,
                &trigger.event_type,
                &trigger.configuration,
            )
            .await
            .map_err(poll_error)?;

        let mut summary = PollSummary {
            fetched: fetched.len(),
            ..PollSummary::default()
        };
        let mut events = Vec::with_capacity(fetched.len());

        for event in fetched {
            let record = ProcessedEvent::new(
                workflow.user_id,
                trigger.service_name.as_str(),
                event.id.as_str(),
                event.scope.clone(),
            );
            match self.ledger.try_claim(&record).await {
                Ok(ClaimOutcome::Claimed) => {}
                Ok(ClaimOutcome::AlreadyClaimed) => {
                    summary.duplicates += 1;
                    continue;
                }
                Err(err) => {
                    warn!(event_id = %event.id, error = %err, "dedup ledger write failed, accepting event");
                    summary.ledger_failures += 1;
                }
            }

            if filter.matches(&event) {
                events.push(event);
            } else {
                debug!(event_id = %event.id, "event filtered out");
                summary.filtered_out += 1;
            }
        }

        summary.accepted = events.len();
        debug!(
            fetched = summary.fetched,
            accepted = summary.accepted,
            duplicates = summary.duplicates,
            filtered_out = summary.filtered_out,
            "poll complete"
        );
        Ok(PollOutcome { events, summary })
    }
}
