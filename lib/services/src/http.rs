//! Shared HTTP plumbing for provider adapters.

use autoflow_integration::AdapterError;
use reqwest::{RequestBuilder, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Builds the client every adapter uses.
///
/// Redirects are not followed so that a token never leaks to another host.
///
/// # Errors
///
/// Returns `ConnectionFailed` if the TLS backend cannot be initialised.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| AdapterError::ConnectionFailed {
            reason: format!("HTTP client error: {e}"),
        })
}

/// Sends a request and decodes a JSON success body.
///
/// # Errors
///
/// Maps transport failures, non-success statuses and undecodable bodies
/// onto [`AdapterError`].
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, AdapterError> {
    let response = request
        .send()
        .await
        .map_err(|e| AdapterError::ConnectionFailed {
            reason: e.without_url().to_string(),
        })?;
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| AdapterError::MalformedResponse {
            reason: e.without_url().to_string(),
        })
}

async fn check_status(response: Response) -> Result<Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_secs = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, retry_after_secs, &body))
}

/// Classifies a non-success provider status.
#[must_use]
pub fn status_error(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> AdapterError {
    let mut reason: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if reason.is_empty() {
        reason = status.canonical_reason().unwrap_or("no reason").to_string();
    }

    match status {
        StatusCode::UNAUTHORIZED => AdapterError::Unauthorized { reason },
        StatusCode::TOO_MANY_REQUESTS => AdapterError::RateLimited { retry_after_secs },
        _ => AdapterError::Remote {
            status: status.as_u16(),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_auth_error() {
        let err = status_error(StatusCode::UNAUTHORIZED, None, "");
        assert!(matches!(err, AdapterError::Unauthorized { ref reason } if reason == "Unauthorized"));
    }

    #[test]
    fn too_many_requests_keeps_retry_after() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, Some(30), "slow down");
        assert_eq!(
            err,
            AdapterError::RateLimited {
                retry_after_secs: Some(30)
            }
        );
    }

    #[test]
    fn other_statuses_are_remote_with_truncated_body() {
        let body = "x".repeat(2000);
        match status_error(StatusCode::BAD_GATEWAY, None, &body) {
            AdapterError::Remote { status, reason } => {
                assert_eq!(status, 502);
                assert_eq!(reason.len(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
