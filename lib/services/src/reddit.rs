//! Reddit adapter.
//!
//! Trigger:
//! - `new_post`: newest posts of `subreddit`, provider order (newest first)
//!
//! Actions:
//! - `create_post`: `subreddit`, `title`, and `url` (link post) or `text` (self post)
//! - `comment`: `post_id` (or `thing_id`), `comment_text` (or `text`)
//! - `vote`: `post_id` (or `id`), `vote_direction` (or `dir`) of 1, 0 or -1
//!
//! A bare post id such as `abc` is sent as the fullname `t3_abc`; ids that
//! already carry a type prefix (`t1_`, `t3_`) are sent unchanged.
//!
//! Action values may contain `{{event...}}` and `{{steps...}}` placeholders.

use crate::http::{build_client, send_json};
use crate::oauth::OAuthApp;
use crate::render_value;
use async_trait::async_trait;
use autoflow_integration::{
    ActionResult, AdapterError, AdapterInfo, Credential, ExecutionContext, ExternalEvent,
    RefreshedToken, ServiceAdapter, StepConfig, optional_str, required_str,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{debug, instrument};

pub const SERVICE_NAME: &str = "reddit";
pub const NEW_POST: &str = "new_post";
pub const CREATE_POST: &str = "create_post";
pub const COMMENT: &str = "comment";
pub const VOTE: &str = "vote";

const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
const DEFAULT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const DEFAULT_USER_AGENT: &str = "AutoFlow:v1.0.0 (by /u/autoflow-app)";
const LISTING_LIMIT: u32 = 25;

/// Reddit application settings.
#[derive(Debug, Clone)]
pub struct RedditSettings {
    pub app: OAuthApp,
    /// Reddit rejects generic agents; this must identify the application.
    pub user_agent: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl RedditSettings {
    /// Settings for the production endpoints.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            app: OAuthApp {
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                token_url: DEFAULT_TOKEN_URL.to_string(),
            },
            user_agent: DEFAULT_USER_AGENT.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Reddit service adapter.
#[derive(Debug, Clone)]
pub struct RedditAdapter {
    settings: RedditSettings,
    http: reqwest::Client,
}

impl RedditAdapter {
    /// Creates the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: RedditSettings) -> Result<Self, AdapterError> {
        let http = build_client(&settings.user_agent, settings.request_timeout)?;
        Ok(Self { settings, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.api_base.trim_end_matches('/'))
    }

    #[instrument(skip(self, credential))]
    async fn new_posts(
        &self,
        credential: &Credential,
        subreddit: &str,
    ) -> Result<Vec<ExternalEvent>, AdapterError> {
        let listing: Listing = send_json(
            self.http
                .get(self.url(&format!("/r/{subreddit}/new.json")))
                .query(&[("limit", LISTING_LIMIT)])
                .bearer_auth(&credential.access_token),
        )
        .await?;

        let events: Vec<ExternalEvent> = listing
            .data
            .children
            .into_iter()
            .map(|child| child.data.into_event())
            .collect();
        debug!(count = events.len(), "fetched posts");
        Ok(events)
    }

    async fn post_form(
        &self,
        credential: &Credential,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<JsonValue, AdapterError> {
        send_json(
            self.http
                .post(self.url(path))
                .bearer_auth(&credential.access_token)
                .form(form),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn create_post(
        &self,
        credential: &Credential,
        config: &StepConfig,
        context: &ExecutionContext,
    ) -> Result<ActionResult, AdapterError> {
        let subreddit = render_value(context, "subreddit", required_str(config, "subreddit")?)?;
        let title = render_value(context, "title", required_str(config, "title")?)?;

        let (kind, body_key, body) = match optional_str(config, "url") {
            Some(url) => ("link", "url", render_value(context, "url", url)?),
            None => (
                "self",
                "text",
                render_value(context, "text", optional_str(config, "text").unwrap_or(""))?,
            ),
        };

        let response = self
            .post_form(
                credential,
                "/api/submit",
                &[
                    ("sr", subreddit.as_str()),
                    ("kind", kind),
                    ("title", title.as_str()),
                    (body_key, body.as_str()),
                    ("api_type", "json"),
                ],
            )
            .await?;
        let data = api_data(response)?;

        let mut result = ActionResult::new(data.clone());
        if let Some(name) = data.get("name").and_then(JsonValue::as_str) {
            result = result.with_external_id(name);
        }
        Ok(result)
    }

    #[instrument(skip_all)]
    async fn comment(
        &self,
        credential: &Credential,
        config: &StepConfig,
        context: &ExecutionContext,
    ) -> Result<ActionResult, AdapterError> {
        let (key, raw) = required_alias(config, &["post_id", "thing_id"])?;
        let thing_id = fullname(&render_value(context, key, raw)?);
        let (key, raw) = required_alias(config, &["comment_text", "text"])?;
        let text = render_value(context, key, raw)?;

        let response = self
            .post_form(
                credential,
                "/api/comment",
                &[
                    ("thing_id", thing_id.as_str()),
                    ("text", text.as_str()),
                    ("api_type", "json"),
                ],
            )
            .await?;
        let data = api_data(response)?;

        let name = data
            .pointer("/things/0/data/name")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let mut result = ActionResult::new(data);
        if let Some(name) = name {
            result = result.with_external_id(name);
        }
        Ok(result)
    }

    #[instrument(skip_all)]
    async fn vote(
        &self,
        credential: &Credential,
        config: &StepConfig,
        context: &ExecutionContext,
    ) -> Result<ActionResult, AdapterError> {
        let (key, raw) = required_alias(config, &["post_id", "id"])?;
        let id = fullname(&render_value(context, key, raw)?);
        let dir = vote_direction(config)?;
        let dir_param = dir.to_string();

        self.post_form(
            credential,
            "/api/vote",
            &[("id", id.as_str()), ("dir", dir_param.as_str())],
        )
        .await?;
        Ok(ActionResult::new(json!({ "id": id, "dir": dir })).with_external_id(id))
    }
}

#[async_trait]
impl ServiceAdapter for RedditAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new(SERVICE_NAME, "Reddit")
            .with_trigger(NEW_POST)
            .with_action(CREATE_POST)
            .with_action(COMMENT)
            .with_action(VOTE)
    }

    async fn fetch_events(
        &self,
        credential: &Credential,
        event_type: &str,
        config: &StepConfig,
    ) -> Result<Vec<ExternalEvent>, AdapterError> {
        match event_type {
            NEW_POST => self.new_posts(credential, required_str(config, "subreddit")?).await,
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
            CREATE_POST => self.create_post(credential, config, context).await,
            COMMENT => self.comment(credential, config, context).await,
            VOTE => self.vote(credential, config, context).await,
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

/// Unwraps the `api_type=json` envelope, failing on reported errors.
fn api_data(response: JsonValue) -> Result<JsonValue, AdapterError> {
    let Some(envelope) = response.get("json") else {
        return Ok(response);
    };

    let errors = envelope
        .get("errors")
        .and_then(JsonValue::as_array)
        .filter(|errors| !errors.is_empty());
    if let Some(errors) = errors {
        return Err(AdapterError::Rejected {
            reason: errors
                .iter()
                .map(JsonValue::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        });
    }
    Ok(envelope.get("data").cloned().unwrap_or(JsonValue::Null))
}

/// Reads the first configured key of `keys`; the first key names the error.
fn required_alias<'a>(
    config: &'a StepConfig,
    keys: &[&'static str],
) -> Result<(&'static str, &'a str), AdapterError> {
    for key in keys {
        if let Some(value) = optional_str(config, key) {
            return Ok((*key, value));
        }
    }
    let primary = keys.first().copied().unwrap_or_default();
    required_str(config, primary).map(|value| (primary, value))
}

fn fullname(id: &str) -> String {
    let id = id.trim();
    let prefixed = id.len() > 3
        && id.starts_with('t')
        && id.as_bytes()[1].is_ascii_digit()
        && id.as_bytes()[2] == b'_';
    if prefixed {
        id.to_string()
    } else {
        format!("t3_{id}")
    }
}

fn vote_direction(config: &StepConfig) -> Result<i8, AdapterError> {
    let key = if config.contains_key("vote_direction") {
        "vote_direction"
    } else {
        "dir"
    };
    let raw = match config.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64(),
        Some(JsonValue::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    match raw {
        Some(1) => Ok(1),
        Some(0) => Ok(0),
        Some(-1) => Ok(-1),
        _ => Err(AdapterError::InvalidConfig {
            key: key.to_string(),
            reason: "expected 1, 0 or -1".to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    is_self: bool,
    #[serde(default)]
    post_hint: Option<String>,
}

impl Post {
    fn into_event(self) -> ExternalEvent {
        #[allow(clippy::cast_possible_truncation)]
        let occurred_at =
            DateTime::<Utc>::from_timestamp(self.created_utc as i64, 0).unwrap_or_else(Utc::now);
        let post_type = if self.is_self {
            "text"
        } else if self.post_hint.as_deref() == Some("image") {
            "image"
        } else {
            "link"
        };

        let payload = json!({
            "id": self.id,
            "title": self.title,
            "content": self.selftext,
            "url": self.url,
            "author": self.author,
            "subreddit": self.subreddit,
            "score": self.score,
            "created_at": occurred_at.to_rfc3339(),
            "permalink": format!("https://reddit.com{}", self.permalink),
            "post_type": post_type,
        });

        ExternalEvent::new(self.id, occurred_at)
            .with_scope(self.subreddit)
            .with_text(self.title)
            .with_text(self.selftext)
            .with_score(self.score)
            .with_payload(payload)
    }
}
