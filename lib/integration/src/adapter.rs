//! Service adapter trait and the values that cross it.
//!
//! Every external service implements [`ServiceAdapter`]. Adapters are
//! stateless: tokens come in through [`Credential`] and all persistence
//! lives in the credential store and dedup ledger, so adding a service
//! means implementing this one trait.

use crate::context::ExecutionContext;
use crate::credential::Credential;
use crate::error::AdapterError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Adapter-specific step configuration. Opaque to the engine.
pub type StepConfig = serde_json::Map<String, JsonValue>;

/// Describes what an adapter can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Registry key, matched against `Step::service_name`.
    pub service_name: String,
    /// Human-readable name.
    pub display_name: String,
    /// Event types usable as a pollable trigger.
    pub trigger_events: Vec<String>,
    /// Event types usable as an action.
    pub action_events: Vec<String>,
}

impl AdapterInfo {
    /// Creates an info block with no events.
    #[must_use]
    pub fn new(service_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            display_name: display_name.into(),
            trigger_events: Vec::new(),
            action_events: Vec::new(),
        }
    }

    /// Adds a trigger event type.
    #[must_use]
    pub fn with_trigger(mut self, event_type: impl Into<String>) -> Self {
        self.trigger_events.push(event_type.into());
        self
    }

    /// Adds an action event type.
    #[must_use]
    pub fn with_action(mut self, event_type: impl Into<String>) -> Self {
        self.action_events.push(event_type.into());
        self
    }

    /// Returns true if `event_type` is a known trigger.
    #[must_use]
    pub fn supports_trigger(&self, event_type: &str) -> bool {
        self.trigger_events.iter().any(|e| e == event_type)
    }

    /// Returns true if `event_type` is a known action.
    #[must_use]
    pub fn supports_action(&self, event_type: &str) -> bool {
        self.action_events.iter().any(|e| e == event_type)
    }
}

/// An event observed on an external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEvent {
    /// Provider-assigned identifier, the dedup key.
    pub id: String,
    /// When the provider says the event happened.
    pub occurred_at: DateTime<Utc>,
    /// Adapter-defined grouping (subreddit, mailbox label).
    pub scope: Option<String>,
    /// Searchable text fields, inspected by keyword filters.
    pub text: Vec<String>,
    /// Ranking signal, inspected by score filters.
    pub score: Option<i64>,
    /// Provider-specific payload.
    pub payload: JsonValue,
}

impl ExternalEvent {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            occurred_at,
            scope: None,
            text: Vec::new(),
            score: None,
            payload: JsonValue::Null,
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Adds a searchable text field.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text.push(text.into());
        self
    }

    /// Sets the score.
    #[must_use]
    pub fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }
}

/// Output of a successful action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Identifier the provider gave the created object, if any.
    pub external_id: Option<String>,
    /// Provider response data, visible to later steps.
    pub data: JsonValue,
}

impl ActionResult {
    /// Creates a result carrying `data`.
    #[must_use]
    pub fn new(data: JsonValue) -> Self {
        Self {
            external_id: None,
            data,
        }
    }

    /// Sets the external identifier.
    #[must_use]
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }
}

/// Tokens returned by a refresh-token grant.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Rotated refresh token; `None` keeps the current one.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &"<redacted>")
            .field("rotated", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Uniform interface over an external service.
///
/// Implementations receive their own configuration at construction and
/// must not read process-wide state.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Returns the adapter's capabilities.
    fn info(&self) -> AdapterInfo;

    /// Reads new events for a pollable trigger.
    ///
    /// Must not cause side effects beyond what the provider's read API does.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails or the configuration is bad.
    async fn fetch_events(
        &self,
        credential: &Credential,
        event_type: &str,
        config: &StepConfig,
    ) -> Result<Vec<ExternalEvent>, AdapterError>;

    /// Performs one effectful operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails or the configuration is bad.
    async fn perform_action(
        &self,
        credential: &Credential,
        event_type: &str,
        config: &StepConfig,
        context: &ExecutionContext,
    ) -> Result<ActionResult, AdapterError>;

    /// Exchanges the credential's refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns `RefreshRejected` when the provider refuses the grant.
    async fn refresh_credential(
        &self,
        _credential: &Credential,
    ) -> Result<RefreshedToken, AdapterError> {
        Err(AdapterError::RefreshUnsupported)
    }

    /// Classifies a failure as credential-related.
    fn is_auth_error(&self, error: &AdapterError) -> bool {
        matches!(error, AdapterError::Unauthorized { .. })
    }
}

/// Reads a required string value from a step configuration.
///
/// # Errors
///
/// Returns `InvalidConfig` if the key is missing, empty or not a string.
pub fn required_str<'a>(config: &'a StepConfig, key: &str) -> Result<&'a str, AdapterError> {
    match config.get(key) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(JsonValue::String(_)) | None => Err(AdapterError::InvalidConfig {
            key: key.to_string(),
            reason: "required".to_string(),
        }),
        Some(_) => Err(AdapterError::InvalidConfig {
            key: key.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

/// Reads an optional, non-empty string value from a step configuration.
#[must_use]
pub fn optional_str<'a>(config: &'a StepConfig, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: JsonValue) -> StepConfig {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn info_capabilities() {
        let info = AdapterInfo::new("reddit", "Reddit")
            .with_trigger("new_post")
            .with_action("create_post");

        assert!(info.supports_trigger("new_post"));
        assert!(!info.supports_trigger("create_post"));
        assert!(info.supports_action("create_post"));
    }

    #[test]
    fn event_builder() {
        let event = ExternalEvent::new("abc", Utc::now())
            .with_scope("rust")
            .with_text("title")
            .with_score(5)
            .with_payload(json!({"k": 1}));

        assert_eq!(event.scope.as_deref(), Some("rust"));
        assert_eq!(event.text, vec!["title"]);
        assert_eq!(event.score, Some(5));
    }

    #[test]
    fn required_str_rejects_missing_and_blank() {
        let cfg = config(json!({"subreddit": "rust", "blank": "  ", "n": 3}));

        assert_eq!(required_str(&cfg, "subreddit").expect("present"), "rust");
        assert!(matches!(
            required_str(&cfg, "missing"),
            Err(AdapterError::InvalidConfig { .. })
        ));
        assert!(required_str(&cfg, "blank").is_err());
        assert!(required_str(&cfg, "n").is_err());
    }

    #[test]
    fn refreshed_token_debug_hides_secret() {
        let token = RefreshedToken {
            access_token: "sekrit".to_string(),
            refresh_token: None,
            expires_at: None,
        };
        assert!(!format!("{token:?}").contains("sekrit"));
    }
}
