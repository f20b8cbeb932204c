//! Gmail adapter.
//!
//! Trigger:
//! - `new_email`: messages matching the optional `query`, newest first
//!
//! Actions:
//! - `send_email`: `to`, `subject`, `body` (plain text)

use crate::http::{build_client, send_json};
use crate::oauth::OAuthApp;
use crate::render_value;
use async_trait::async_trait;
use autoflow_integration::{
    ActionResult, AdapterError, AdapterInfo, Credential, ExecutionContext, ExternalEvent,
    RefreshedToken, ServiceAdapter, StepConfig, optional_str, required_str,
};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

pub const SERVICE_NAME: &str = "gmail";
pub const NEW_EMAIL: &str = "new_email";
pub const SEND_EMAIL: &str = "send_email";

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_MAX_RESULTS: u32 = 10;

/// Gmail application settings.
#[derive(Debug, Clone)]
pub struct GmailSettings {
    pub app: OAuthApp,
    pub user_agent: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl GmailSettings {
    /// Settings for the production endpoints.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            app: OAuthApp {
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                token_url: DEFAULT_TOKEN_URL.to_string(),
            },
            user_agent: concat!("autoflow/", env!("CARGO_PKG_VERSION")).to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Gmail service adapter.
#[derive(Debug, Clone)]
pub struct GmailAdapter {
    settings: GmailSettings,
    http: reqwest::Client,
}

impl GmailAdapter {
    /// Creates the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: GmailSettings) -> Result<Self, AdapterError> {
        let http = build_client(&settings.user_agent, settings.request_timeout)?;
        Ok(Self { settings, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.api_base.trim_end_matches('/'))
    }

    #[instrument(skip(self, credential, config))]
    async fn new_emails(
        &self,
        credential: &Credential,
        config: &StepConfig,
    ) -> Result<Vec<ExternalEvent>, AdapterError> {
        let query = optional_str(config, "query");
        let max_results = match config.get("max_results") {
            None => DEFAULT_MAX_RESULTS,
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| AdapterError::InvalidConfig {
                    key: "max_results".to_string(),
                    reason: "expected a positive integer".to_string(),
                })?,
        };

        let mut request = self
            .http
            .get(self.url("/users/me/messages"))
            .bearer_auth(&credential.access_token)
            .query(&[("maxResults", max_results.to_string())]);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }
        let list: MessageList = send_json(request).await?;

        let mut events = Vec::with_capacity(list.messages.len());
        for stub in list.messages {
            let message: Message = send_json(
                self.http
                    .get(self.url(&format!("/users/me/messages/{}", stub.id)))
                    .bearer_auth(&credential.access_token)
                    .query(&[
                        ("format", "metadata"),
                        ("metadataHeaders", "Subject"),
                        ("metadataHeaders", "From"),
                    ]),
            )
            .await?;
            events.push(message.into_event(query));
        }
        debug!(count = events.len(), "fetched messages");
        Ok(events)
    }

    #[instrument(skip_all)]
    async fn send_email(
        &self,
        credential: &Credential,
        config: &StepConfig,
        context: &ExecutionContext,
    ) -> Result<ActionResult, AdapterError> {
        let to = header_value(context, config, "to")?;
        let subject = header_value(context, config, "subject")?;
        let body = render_value(context, "body", required_str(config, "body")?)?;

        let raw = URL_SAFE_NO_PAD.encode(rfc822(&to, &subject, &body));
        let sent: SentMessage = send_json(
            self.http
                .post(self.url("/users/me/messages/send"))
                .bearer_auth(&credential.access_token)
                .json(&json!({ "raw": raw })),
        )
        .await?;

        Ok(
            ActionResult::new(json!({ "id": sent.id, "thread_id": sent.thread_id }))
                .with_external_id(sent.id),
        )
    }
}

#[async_trait]
impl ServiceAdapter for GmailAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new(SERVICE_NAME, "Gmail")
            .with_trigger(NEW_EMAIL)
            .with_action(SEND_EMAIL)
    }

    async fn fetch_events(
        &self,
        credential: &Credential,
        event_type: &str,
        config: &StepConfig,
    ) -> Result<Vec<ExternalEvent>, AdapterError> {
        match event_type {
            NEW_EMAIL => self.new_emails(credential, config).await,
            other => Err(AdapterError::UnsupportedEvent {
                event_type: other.to_string(),
            }),
        }
    }

    async fn perform_action(
        &self,
        credential: &Credential,
        event_type: &str,
        config: &StepConfig,
        context: &ExecutionContext,
    ) -> Result<ActionResult, AdapterError> {
        match event_type {
            SEND_EMAIL => self.send_email(credential, config, context).await,
            other => Err(AdapterError::UnsupportedEvent {
                event_type: other.to_string(),
            }),
        }
    }

    async fn refresh_credential(
        &self,
        credential: &Credential,
    ) -> Result<RefreshedToken, AdapterError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(AdapterError::RefreshUnsupported)?;
        self.settings.app.refresh(&self.http, refresh_token).await
    }
}

/// Renders a header value, refusing line breaks.
fn header_value(
    context: &ExecutionContext,
    config: &StepConfig,
    key: &str,
) -> Result<String, AdapterError> {
    let value = render_value(context, key, required_str(config, key)?)?;
    if value.contains(['\r', '\n']) {
        return Err(AdapterError::InvalidConfig {
            key: key.to_string(),
            reason: "must not contain line breaks".to_string(),
        });
    }
    Ok(value)
}

fn rfc822(to: &str, subject: &str, body: &str) -> String {
    format!(
        "To: {to}\r\nSubject: {subject}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{body}"
    )
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    /// Milliseconds since the epoch, as a string.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
}

impl Message {
    fn header(&self, name: &str) -> String {
        self.payload
            .as_ref()
            .and_then(|p| p.headers.iter().find(|h| h.name.eq_ignore_ascii_case(name)))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    }

    fn into_event(self, query: Option<&str>) -> ExternalEvent {
        let occurred_at = self
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        let subject = self.header("Subject");
        let from = self.header("From");

        let payload = json!({
            "id": self.id,
            "thread_id": self.thread_id,
            "subject": subject,
            "from": from,
            "snippet": self.snippet,
            "received_at": occurred_at.to_rfc3339(),
        });

        let mut event = ExternalEvent::new(self.id, occurred_at)
            .with_text(subject)
            .with_text(self.snippet)
            .with_payload(payload);
        if let Some(q) = query {
            event = event.with_scope(q);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{credential, spawn_stub};
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value as JsonValue;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer good")
    }

    async fn list(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<JsonValue>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": {"code": 401}})));
        }
        seen.queries.lock().unwrap().push(query);
        (
            StatusCode::OK,
            Json(json!({"messages": [{"id": "m2", "threadId": "t"}, {"id": "m1", "threadId": "t"}]})),
        )
    }

    async fn message(headers: HeaderMap, Path(id): Path<String>) -> (StatusCode, Json<JsonValue>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({})));
        }
        (
            StatusCode::OK,
            Json(json!({
                "id": id,
                "threadId": "t",
                "snippet": format!("snippet of {id}"),
                "internalDate": "1700000000000",
                "payload": {"headers": [
                    {"name": "Subject", "value": format!("Subject {id}")},
                    {"name": "From", "value": "a@example.test"}
                ]}
            })),
        )
    }

    async fn send(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<JsonValue>,
    ) -> (StatusCode, Json<JsonValue>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({})));
        }
        let raw = body["raw"].as_str().unwrap_or_default().to_string();
        seen.sent.lock().unwrap().push(raw);
        (StatusCode::OK, Json(json!({"id": "sent-1", "threadId": "t9"})))
    }

    async fn adapter(seen: Seen) -> GmailAdapter {
        let router = Router::new()
            .route("/users/me/messages", get(list))
            .route("/users/me/messages/send", post(send))
            .route("/users/me/messages/{id}", get(message))
            .with_state(seen);
        let base = spawn_stub(router).await;

        let mut settings = GmailSettings::new("id", "secret");
        settings.api_base = base;
        GmailAdapter::new(settings).expect("adapter")
    }

    fn config(value: JsonValue) -> StepConfig {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn new_email_lists_then_fetches_metadata() {
        let seen = Seen::default();
        let adapter = adapter(seen.clone()).await;

        let events = adapter
            .fetch_events(
                &credential("good", None),
                NEW_EMAIL,
                &config(json!({"query": "is:unread"})),
            )
            .await
            .expect("fetch");

        assert_eq!(events.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), ["m2", "m1"]);
        assert_eq!(events[0].text, vec!["Subject m2", "snippet of m2"]);
        assert_eq!(events[0].payload["from"], "a@example.test");
        assert_eq!(events[0].scope.as_deref(), Some("is:unread"));
        assert_eq!(events[0].occurred_at.timestamp(), 1_700_000_000);

        let queries = seen.queries.lock().unwrap();
        assert_eq!(queries[0]["q"], "is:unread");
        assert_eq!(queries[0]["maxResults"], "10");
    }

    #[tokio::test]
    async fn invalid_max_results_is_rejected() {
        let adapter = adapter(Seen::default()).await;
        let err = adapter
            .fetch_events(&credential("good", None), NEW_EMAIL, &config(json!({"max_results": 0})))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn expired_token_is_auth_error() {
        let adapter = adapter(Seen::default()).await;
        let err = adapter
            .fetch_events(&credential("expired", None), NEW_EMAIL, &StepConfig::new())
            .await
            .unwrap_err();
        assert!(adapter.is_auth_error(&err));
    }

    #[tokio::test]
    async fn send_email_posts_base64url_message() {
        let seen = Seen::default();
        let adapter = adapter(seen.clone()).await;
        let event = ExternalEvent::new("m1", Utc::now()).with_payload(json!({"subject": "Hi"}));
        let context = ExecutionContext::new(event);

        let result = adapter
            .perform_action(
                &credential("good", None),
                SEND_EMAIL,
                &config(json!({
                    "to": "b@example.test",
                    "subject": "Fwd: {{event.payload.subject}}",
                    "body": "see {{event.id}}"
                })),
                &context,
            )
            .await
            .expect("send");

        assert_eq!(result.external_id.as_deref(), Some("sent-1"));
        let raw = seen.sent.lock().unwrap()[0].clone();
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).expect("base64")).expect("utf8");
        assert!(decoded.starts_with("To: b@example.test\r\nSubject: Fwd: Hi\r\n"));
        assert!(decoded.ends_with("\r\n\r\nsee m1"));
    }

    #[tokio::test]
    async fn header_injection_is_refused() {
        let adapter = adapter(Seen::default()).await;
        let context = ExecutionContext::new(ExternalEvent::new("m1", Utc::now()));

        let err = adapter
            .perform_action(
                &credential("good", None),
                SEND_EMAIL,
                &config(json!({"to": "a@x.test\r\nBcc: c@x.test", "subject": "s", "body": "b"})),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidConfig { ref key, .. } if key == "to"));
    }
}
