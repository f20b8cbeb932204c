//! Credential lifecycle manager.
//!
//! Every adapter call made on behalf of a user goes through
//! [`CredentialLifecycleManager::invoke`], which loads the user's credential,
//! bounds the call with a timeout and recovers from an expired access token
//! by refreshing it and retrying exactly once.

use crate::adapter::{ActionResult, ExternalEvent, ServiceAdapter, StepConfig};
use crate::context::ExecutionContext;
use crate::credential::{Credential, CredentialStore};
use crate::error::{AdapterError, CredentialError, LifecycleError};
use crate::registry::AdapterRegistry;
use async_trait::async_trait;
use autoflow_core::UserId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// An adapter operation that can be replayed with a refreshed credential.
#[async_trait]
pub trait AdapterOp: Send + Sync {
    type Output: Send;

    /// Operation name for logs and timeout errors.
    fn name(&self) -> &'static str;

    /// Runs the operation once.
    async fn call(
        &self,
        adapter: &dyn ServiceAdapter,
        credential: &Credential,
    ) -> Result<Self::Output, AdapterError>;
}

/// Reads trigger events.
#[derive(Debug, Clone, Copy)]
pub struct FetchEvents<'a> {
    pub event_type: &'a str,
    pub config: &'a StepConfig,
}

#[async_trait]
impl AdapterOp for FetchEvents<'_> {
    type Output = Vec<ExternalEvent>;

    fn name(&self) -> &'static str {
        "fetch_events"
    }

    async fn call(
        &self,
        adapter: &dyn ServiceAdapter,
        credential: &Credential,
    ) -> Result<Self::Output, AdapterError> {
        adapter
            .fetch_events(credential, self.event_type, self.config)
            .await
    }
}

/// Performs one action step.
#[derive(Debug, Clone, Copy)]
pub struct PerformAction<'a> {
    pub event_type: &'a str,
    pub config: &'a StepConfig,
    pub context: &'a ExecutionContext,
}

#[async_trait]
impl AdapterOp for PerformAction<'_> {
    type Output = ActionResult;

    fn name(&self) -> &'static str {
        "perform_action"
    }

    async fn call(
        &self,
        adapter: &dyn ServiceAdapter,
        credential: &Credential,
    ) -> Result<Self::Output, AdapterError> {
        adapter
            .perform_action(credential, self.event_type, self.config, self.context)
            .await
    }
}

/// Resolves credentials and recovers from token expiry.
///
/// Holds no lock across adapter I/O; concurrent calls for the same user may
/// each refresh, and the last write wins.
#[derive(Clone)]
pub struct CredentialLifecycleManager {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn CredentialStore>,
    call_timeout: Duration,
}

impl CredentialLifecycleManager {
    /// Creates a manager bounding each adapter call by `call_timeout`.
    #[must_use]
    pub fn new(
        registry: Arc<AdapterRegistry>,
        store: Arc<dyn CredentialStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            call_timeout,
        }
    }

    /// The adapter registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// The credential store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Runs `op` for `user_id` against `service_name`.
    ///
    /// # Errors
    ///
    /// - `UnknownService` / `CredentialNotFound` before any call is made
    /// - `Timeout` if a call exceeds the bound; never retried
    /// - `InvalidCredential` if the provider refuses the refresh
    /// - `Adapter` with the failure of the last attempt, unmodified
    #[instrument(skip(self, op), fields(op = op.name()))]
    pub async fn invoke<O: AdapterOp>(
        &self,
        user_id: UserId,
        service_name: &str,
        op: &O,
    ) -> Result<O::Output, LifecycleError> {
        let adapter =
            self.registry
                .get(service_name)
                .ok_or_else(|| LifecycleError::UnknownService {
                    service_name: service_name.to_string(),
                })?;
        let mut credential = self.load(user_id, service_name).await?;

        let err = match self
            .bounded(op.name(), op.call(adapter.as_ref(), &credential))
            .await?
        {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };

        if !adapter.is_auth_error(&err) || !credential.can_refresh() {
            return Err(LifecycleError::Adapter(err));
        }

        debug!(error = %err, "access token rejected, refreshing");
        let token = match self
            .bounded(
                "refresh_credential",
                adapter.refresh_credential(&credential),
            )
            .await?
        {
            Ok(token) => token,
            Err(AdapterError::RefreshUnsupported) => return Err(LifecycleError::Adapter(err)),
            Err(refresh_err)
                if matches!(refresh_err, AdapterError::RefreshRejected { .. })
                    || adapter.is_auth_error(&refresh_err) =>
            {
                warn!(error = %refresh_err, "credential refresh rejected");
                return Err(LifecycleError::InvalidCredential {
                    service_name: service_name.to_string(),
                    reason: refresh_err.to_string(),
                });
            }
            Err(refresh_err) => return Err(LifecycleError::Adapter(refresh_err)),
        };

        credential.apply_refresh(token);
        self.store
            .update_tokens(&credential)
            .await
            .map_err(|e| match e {
                CredentialError::NotFound {
                    user_id,
                    service_name,
                } => LifecycleError::CredentialNotFound {
                    user_id,
                    service_name,
                },
                other => LifecycleError::Store(other),
            })?;

        self.bounded(op.name(), op.call(adapter.as_ref(), &credential))
            .await?
            .map_err(LifecycleError::Adapter)
    }

    /// Fetches trigger events for a user.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke).
    pub async fn fetch_events(
        &self,
        user_id: UserId,
        service_name: &str,
        event_type: &str,
        config: &StepConfig,
    ) -> Result<Vec<ExternalEvent>, LifecycleError> {
        self.invoke(user_id, service_name, &FetchEvents { event_type, config })
            .await
    }

    /// Performs an action for a user.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke).
    pub async fn perform_action(
        &self,
        user_id: UserId,
        service_name: &str,
        event_type: &str,
        config: &StepConfig,
        context: &ExecutionContext,
    ) -> Result<ActionResult, LifecycleError> {
        self.invoke(
            user_id,
            service_name,
            &PerformAction {
                event_type,
                config,
                context,
            },
        )
        .await
    }

    async fn load(&self, user_id: UserId, service_name: &str) -> Result<Credential, LifecycleError> {
        self.store
            .get(user_id, service_name)
            .await
            .map_err(LifecycleError::Store)?
            .ok_or_else(|| LifecycleError::CredentialNotFound {
                user_id,
                service_name: service_name.to_string(),
            })
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = T>,
    ) -> Result<T, LifecycleError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                warn!(operation, "adapter call timed out");
                LifecycleError::Timeout {
                    operation,
                    after: self.call_timeout,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{InMemoryCredentialStore, TokenPayload};
    use crate::scripted::{CallKind, SCRIPTED_ACTION, SCRIPTED_TRIGGER, ScriptedAdapter};
    use chrono::Utc;
    use serde_json::json;

    struct Fixture {
        adapter: Arc<ScriptedAdapter>,
        store: Arc<InMemoryCredentialStore>,
        manager: CredentialLifecycleManager,
        user: UserId,
    }

    async fn fixture_with(adapter: ScriptedAdapter, refresh_token: Option<&str>) -> Fixture {
        let adapter = Arc::new(adapter);
        let store = Arc::new(InMemoryCredentialStore::new());
        let user = UserId::new();
        let credential = Credential::from_payload(
            user,
            "svc",
            TokenPayload {
                access_token: "original".to_string(),
                refresh_token: refresh_token.map(str::to_string),
                expires_in: None,
                expires_at: None,
                extra: serde_json::Map::new(),
            },
        )
        .expect("valid");
        store.upsert(credential).await.expect("upsert");

        let registry = AdapterRegistry::new().with(adapter.clone());
        let manager = CredentialLifecycleManager::new(
            Arc::new(registry),
            store.clone(),
            Duration::from_millis(200),
        );
        Fixture {
            adapter,
            store,
            manager,
            user,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(ScriptedAdapter::new("svc"), Some("refresh")).await
    }

    fn unauthorized(reason: &str) -> AdapterError {
        AdapterError::Unauthorized {
            reason: reason.to_string(),
        }
    }

    fn tokens_used(adapter: &ScriptedAdapter) -> Vec<String> {
        adapter
            .calls_of(CallKind::Fetch)
            .into_iter()
            .map(|c| c.access_token)
            .collect()
    }

    #[tokio::test]
    async fn success_needs_no_refresh() {
        let f = fixture().await;
        f.adapter
            .push_fetch(Ok(vec![ExternalEvent::new("e1", Utc::now())]));

        let events = f
            .manager
            .fetch_events(f.user, "svc", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .expect("fetch");

        assert_eq!(events.len(), 1);
        assert_eq!(f.adapter.refresh_count(), 0);
        assert_eq!(tokens_used(&f.adapter), vec!["original"]);
    }

    #[tokio::test]
    async fn auth_error_refreshes_once_and_retries() {
        let f = fixture().await;
        f.adapter.push_fetch(Err(unauthorized("expired")));
        f.adapter
            .push_fetch(Ok(vec![ExternalEvent::new("e1", Utc::now())]));

        let events = f
            .manager
            .fetch_events(f.user, "svc", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .expect("retry succeeds");

        assert_eq!(events.len(), 1);
        assert_eq!(f.adapter.refresh_count(), 1);
        assert_eq!(tokens_used(&f.adapter), vec!["original", "refreshed-1"]);

        let stored = f
            .store
            .get(f.user, "svc")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(stored.access_token, "refreshed-1");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn second_failure_surfaces_verbatim() {
        let f = fixture().await;
        f.adapter.push_fetch(Err(unauthorized("first")));
        f.adapter.push_fetch(Err(unauthorized("second")));

        let err = f
            .manager
            .fetch_events(f.user, "svc", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .unwrap_err();

        assert_eq!(err, LifecycleError::Adapter(unauthorized("second")));
        assert_eq!(f.adapter.refresh_count(), 1);
        assert_eq!(f.adapter.calls_of(CallKind::Fetch).len(), 2);
    }

    #[tokio::test]
    async fn non_auth_error_is_not_retried() {
        let f = fixture().await;
        let remote = AdapterError::Remote {
            status: 500,
            reason: "boom".to_string(),
        };
        f.adapter.push_fetch(Err(remote.clone()));

        let err = f
            .manager
            .fetch_events(f.user, "svc", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .unwrap_err();

        assert_eq!(err, LifecycleError::Adapter(remote));
        assert_eq!(f.adapter.refresh_count(), 0);
    }

    #[tokio::test]
    async fn no_refresh_token_propagates_auth_error() {
        let f = fixture_with(ScriptedAdapter::new("svc"), None).await;
        f.adapter.push_fetch(Err(unauthorized("expired")));

        let err = f
            .manager
            .fetch_events(f.user, "svc", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .unwrap_err();

        assert_eq!(err, LifecycleError::Adapter(unauthorized("expired")));
        assert_eq!(f.adapter.refresh_count(), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_is_invalid_credential() {
        let f = fixture().await;
        f.adapter.push_fetch(Err(unauthorized("expired")));
        f.adapter.push_refresh(Err(AdapterError::RefreshRejected {
            reason: "invalid_grant".to_string(),
        }));

        let err = f
            .manager
            .fetch_events(f.user, "svc", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::InvalidCredential { .. }));
        assert_eq!(f.adapter.calls_of(CallKind::Fetch).len(), 1);
    }

    #[tokio::test]
    async fn timeout_is_not_retried() {
        let f = fixture_with(
            ScriptedAdapter::new("svc").with_delay(Duration::from_secs(5)),
            Some("refresh"),
        )
        .await;

        let err = f
            .manager
            .fetch_events(f.user, "svc", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::Timeout {
                operation: "fetch_events",
                ..
            }
        ));
        assert_eq!(f.adapter.refresh_count(), 0);
        assert_eq!(f.adapter.calls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_service_and_missing_credential() {
        let f = fixture().await;

        let err = f
            .manager
            .fetch_events(f.user, "nope", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownService { .. }));

        let err = f
            .manager
            .fetch_events(UserId::new(), "svc", SCRIPTED_TRIGGER, &StepConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::CredentialNotFound { .. }));
        assert!(f.adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn action_retry_uses_refreshed_token() {
        let f = fixture().await;
        f.adapter.push_action(Err(unauthorized("expired")));
        let context = ExecutionContext::new(ExternalEvent::new("e1", Utc::now()));
        let config = json!({"k": "v"}).as_object().cloned().expect("object");

        let result = f
            .manager
            .perform_action(f.user, "svc", SCRIPTED_ACTION, &config, &context)
            .await
            .expect("action");

        assert_eq!(result.data["event_id"], "e1");
        let actions = f.adapter.calls_of(CallKind::Action);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].access_token, "refreshed-1");
        assert_eq!(actions[1].config, config);
    }
}
