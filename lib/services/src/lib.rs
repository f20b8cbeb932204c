//! Reference service adapters for the autoflow engine.
//!
//! - [`reddit::RedditAdapter`]: subreddit listings, posts, comments and votes
//! - [`gmail::GmailAdapter`]: inbox search and sending mail
//!
//! Both talk to the provider over `reqwest` and refresh tokens through the
//! `oauth2` refresh-token grant. Settings are injected at construction.

pub mod gmail;
pub mod http;
pub mod oauth;
pub mod reddit;

pub use gmail::{GmailAdapter, GmailSettings};
pub use oauth::OAuthApp;
pub use reddit::{RedditAdapter, RedditSettings};

use autoflow_integration::{AdapterError, ExecutionContext};

/// Renders an action value against the run context.
fn render_value(
    context: &ExecutionContext,
    key: &str,
    template: &str,
) -> Result<String, AdapterError> {
    context
        .render(template)
        .map_err(|e| AdapterError::InvalidConfig {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod test_support {
    use autoflow_core::UserId;
    use autoflow_integration::{Credential, TokenPayload};

    /// Serves `router` on an ephemeral local port and returns its base URL.
    pub async fn spawn_stub(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("stub server");
        });
        format!("http://{addr}")
    }

    pub fn credential(access_token: &str, refresh_token: Option<&str>) -> Credential {
        Credential::from_payload(
            UserId::new(),
            "test",
            TokenPayload {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(str::to_string),
                expires_in: Some(3600),
                expires_at: None,
                extra: serde_json::Map::new(),
            },
        )
        .expect("valid credential")
    }
}
