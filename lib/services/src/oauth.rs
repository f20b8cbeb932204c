//! Refresh-token grant shared by the OAuth-backed adapters.

use autoflow_integration::{AdapterError, RefreshedToken};
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, RefreshToken, RequestTokenError, TokenResponse, TokenUrl};
use tracing::{debug, instrument};

/// OAuth application registration for one provider.
#[derive(Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

impl std::fmt::Debug for OAuthApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthApp")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl OAuthApp {
    /// Exchanges `refresh_token` for a new access token.
    ///
    /// The client authenticates with HTTP Basic auth and the grant is sent
    /// form-encoded, which both Reddit and Google accept.
    ///
    /// # Errors
    ///
    /// - `RefreshRejected` if the provider answers with an OAuth error
    /// - `ConnectionFailed` if the token endpoint is unreachable
    /// - `MalformedResponse` if the token response cannot be parsed
    #[instrument(skip(self, http, refresh_token), fields(token_url = %self.token_url))]
    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<RefreshedToken, AdapterError> {
        let token_url =
            TokenUrl::new(self.token_url.clone()).map_err(|e| AdapterError::InvalidConfig {
                key: "token_url".to_string(),
                reason: e.to_string(),
            })?;
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(token_url);

        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(http)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(resp) => AdapterError::RefreshRejected {
                    reason: match resp.error_description() {
                        Some(description) => format!("{}: {description}", resp.error()),
                        None => resp.error().to_string(),
                    },
                },
                RequestTokenError::Request(e) => AdapterError::ConnectionFailed {
                    reason: e.to_string(),
                },
                RequestTokenError::Parse(e, _) => AdapterError::MalformedResponse {
                    reason: e.to_string(),
                },
                RequestTokenError::Other(reason) => AdapterError::RefreshRejected { reason },
            })?;

        let expires_at = token
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        debug!(rotated = token.refresh_token().is_some(), "refreshed access token");

        Ok(RefreshedToken {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_at,
        })
    }
}
