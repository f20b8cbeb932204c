//! Error types for the integration crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `AdapterError`: failures reported by a service adapter
//! - `CredentialError`: failures of the credential store
//! - `LedgerError`: failures of the dedup ledger
//! - `LifecycleError`: outcome of a credential-managed adapter call

use autoflow_core::UserId;
use std::fmt;
use std::time::Duration;

/// Errors reported by a service adapter.
///
/// Whether a given variant counts as a credential problem is decided by
/// [`ServiceAdapter::is_auth_error`](crate::adapter::ServiceAdapter::is_auth_error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The provider rejected the access token.
    Unauthorized { reason: String },
    /// The provider throttled the request.
    RateLimited { retry_after_secs: Option<u64> },
    /// The provider answered with a non-success status.
    Remote { status: u16, reason: String },
    /// The provider accepted the request but reported a domain failure.
    Rejected { reason: String },
    /// The request never reached the provider.
    ConnectionFailed { reason: String },
    /// The step configuration is missing a key or holds a bad value.
    InvalidConfig { key: String, reason: String },
    /// The adapter has no such trigger or action event.
    UnsupportedEvent { event_type: String },
    /// The provider response could not be decoded.
    MalformedResponse { reason: String },
    /// The adapter cannot refresh tokens.
    RefreshUnsupported,
    /// The provider refused the refresh-token grant.
    RefreshRejected { reason: String },
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized { reason } => write!(f, "unauthorized: {reason}"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::Remote { status, reason } => {
                write!(f, "provider returned {status}: {reason}")
            }
            Self::Rejected { reason } => write!(f, "provider rejected request: {reason}"),
            Self::ConnectionFailed { reason } => write!(f, "connection failed: {reason}"),
            Self::InvalidConfig { key, reason } => {
                write!(f, "invalid configuration '{key}': {reason}")
            }
            Self::UnsupportedEvent { event_type } => {
                write!(f, "unsupported event type: {event_type}")
            }
            Self::MalformedResponse { reason } => write!(f, "malformed response: {reason}"),
            Self::RefreshUnsupported => write!(f, "token refresh not supported"),
            Self::RefreshRejected { reason } => write!(f, "token refresh rejected: {reason}"),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Errors from credential store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No credential for the (user, service) pair.
    NotFound { user_id: UserId, service_name: String },
    /// The token payload is unusable.
    Invalid { reason: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound {
                user_id,
                service_name,
            } => write!(f, "no '{service_name}' credential for {user_id}"),
            Self::Invalid { reason } => write!(f, "invalid credential: {reason}"),
            Self::StorageFailed { reason } => {
                write!(f, "credential storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

/// Errors from dedup ledger operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageFailed { reason } => write!(f, "dedup ledger write failed: {reason}"),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Outcome of a call routed through the credential lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// No adapter registered under this name.
    UnknownService { service_name: String },
    /// The user never connected this service, or disconnected it.
    CredentialNotFound { user_id: UserId, service_name: String },
    /// The stored credential could not be refreshed.
    InvalidCredential { service_name: String, reason: String },
    /// The adapter call failed; carried unmodified.
    Adapter(AdapterError),
    /// The call exceeded the configured bound.
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// The credential store failed.
    Store(CredentialError),
}

impl LifecycleError {
    /// Returns the adapter failure, if this is one.
    #[must_use]
    pub fn adapter_error(&self) -> Option<&AdapterError> {
        match self {
            Self::Adapter(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownService { service_name } => {
                write!(f, "unknown service: {service_name}")
            }
            Self::CredentialNotFound {
                user_id,
                service_name,
            } => write!(f, "credential not found: {service_name} for {user_id}"),
            Self::InvalidCredential {
                service_name,
                reason,
            } => write!(f, "invalid {service_name} credential: {reason}"),
            Self::Adapter(err) => write!(f, "{err}"),
            Self::Timeout { operation, after } => {
                write!(f, "{operation} timed out after {}ms", after.as_millis())
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl From<AdapterError> for LifecycleError {
    fn from(err: AdapterError) -> Self {
        Self::Adapter(err)
    }
}
