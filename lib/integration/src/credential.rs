//! Per-user OAuth credentials and their storage.
//!
//! A credential is unique per (user, service). Connecting again replaces
//! the stored record, refreshing updates it in place and disconnecting
//! removes it. Tokens never appear in `Debug` output or logs.

use crate::adapter::RefreshedToken;
use crate::error::CredentialError;
use async_trait::async_trait;
use autoflow_core::UserId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::RwLock;

/// How long before expiry a token is reported as needing refresh.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Token material handed over by the connect flow.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, as returned by most token endpoints.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Absolute expiry; takes precedence over `expires_in`.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider-specific extras (granted scopes, account name).
    #[serde(default)]
    pub extra: serde_json::Map<String, JsonValue>,
}

impl std::fmt::Debug for TokenPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPayload")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A stored credential for one (user, service) pair.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: UserId,
    pub service_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub extra: serde_json::Map<String, JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("service_name", &self.service_name)
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Credential {
    /// Builds a credential from a connect payload.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the access token is empty or the lifetime is negative.
    pub fn from_payload(
        user_id: UserId,
        service_name: impl Into<String>,
        payload: TokenPayload,
    ) -> Result<Self, CredentialError> {
        if payload.access_token.trim().is_empty() {
            return Err(CredentialError::Invalid {
                reason: "access_token is empty".to_string(),
            });
        }
        if payload.expires_in.is_some_and(|secs| secs < 0) {
            return Err(CredentialError::Invalid {
                reason: "expires_in is negative".to_string(),
            });
        }

        let now = Utc::now();
        let expires_at = payload
            .expires_at
            .or_else(|| payload.expires_in.map(|secs| now + Duration::seconds(secs)));

        Ok(Self {
            user_id,
            service_name: service_name.into(),
            access_token: payload.access_token,
            refresh_token: payload.refresh_token.filter(|t| !t.trim().is_empty()),
            expires_at,
            extra: payload.extra,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true if a refresh-token grant is possible.
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Returns true if the token expires within the refresh margin.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.expires_at
            .is_some_and(|expires| expires < Utc::now() + Duration::minutes(REFRESH_MARGIN_MINUTES))
    }

    /// Applies a refresh result, keeping the old refresh token unless rotated.
    pub fn apply_refresh(&mut self, token: RefreshedToken) {
        self.access_token = token.access_token;
        if let Some(rotated) = token.refresh_token {
            self.refresh_token = Some(rotated);
        }
        self.expires_at = token.expires_at;
        self.updated_at = Utc::now();
    }
}

/// Storage for credentials.
///
/// Implementations must allow concurrent reads and make each write atomic
/// for its single record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the credential for (user, service).
    async fn get(
        &self,
        user_id: UserId,
        service_name: &str,
    ) -> Result<Option<Credential>, CredentialError>;

    /// Inserts or replaces the credential for (user, service).
    ///
    /// The original `created_at` survives a replace.
    async fn upsert(&self, credential: Credential) -> Result<Credential, CredentialError>;

    /// Writes refreshed tokens back to an existing record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the credential was removed meanwhile.
    async fn update_tokens(&self, credential: &Credential) -> Result<(), CredentialError>;

    /// Removes the credential; returns whether one existed.
    async fn delete(&self, user_id: UserId, service_name: &str) -> Result<bool, CredentialError>;

    /// Lists a user's credentials.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Credential>, CredentialError>;
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<(UserId, String), Credential>>,
}

impl InMemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CredentialError {
    CredentialError::StorageFailed {
        reason: "credential map lock poisoned".to_string(),
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(
        &self,
        user_id: UserId,
        service_name: &str,
    ) -> Result<Option<Credential>, CredentialError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&(user_id, service_name.to_string())).cloned())
    }

    async fn upsert(&self, mut credential: Credential) -> Result<Credential, CredentialError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let key = (credential.user_id, credential.service_name.clone());
        if let Some(existing) = records.get(&key) {
            credential.created_at = existing.created_at;
        }
        records.insert(key, credential.clone());
        Ok(credential)
    }

    async fn update_tokens(&self, credential: &Credential) -> Result<(), CredentialError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let key = (credential.user_id, credential.service_name.clone());
        match records.get_mut(&key) {
            Some(stored) => {
                stored.access_token = credential.access_token.clone();
                stored.refresh_token = credential.refresh_token.clone();
                stored.expires_at = credential.expires_at;
                stored.updated_at = credential.updated_at;
                Ok(())
            }
            None => Err(CredentialError::NotFound {
                user_id: credential.user_id,
                service_name: credential.service_name.clone(),
            }),
        }
    }

    async fn delete(&self, user_id: UserId, service_name: &str) -> Result<bool, CredentialError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(&(user_id, service_name.to_string())).is_some())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Credential>, CredentialError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut found: Vec<Credential> = records
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(found)
    }
}
