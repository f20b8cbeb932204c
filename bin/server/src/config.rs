//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (`RUNNER__POLL_INTERVAL_SECONDS=30`). Provider
//! sections are optional; an adapter is only registered when its section
//! is present.

use serde::Deserialize;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL connection URL. Without one the server keeps all state in
    /// memory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub runner: RunnerConfig,

    /// Reddit application credentials.
    #[serde(default)]
    pub reddit: Option<RedditConfig>,

    /// Google application credentials, used by the Gmail adapter.
    #[serde(default)]
    pub google: Option<GoogleConfig>,
}

/// Polling and execution limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Seconds between poll ticks.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Upper bound for a single provider call, in seconds.
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,

    /// Runs kept per workflow for the status surface.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Overrides the default user agent; Reddit asks for one naming the app
    /// and its operator.
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_poll_interval_seconds() -> u64 {
    60
}

fn default_call_timeout_seconds() -> u64 {
    30
}

fn default_history_limit() -> usize {
    autoflow_scheduler::DEFAULT_HISTORY_LIMIT
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            call_timeout_seconds: default_call_timeout_seconds(),
            history_limit: default_history_limit(),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Rejects limits that would stall every cycle.
    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.poll_interval_seconds == 0 {
            return Err(config::ConfigError::Message(
                "runner.poll_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.call_timeout_seconds == 0 {
            return Err(config::ConfigError::Message(
                "runner.call_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is present but invalid, including a
    /// zero poll interval or call timeout.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_builder(config::Config::builder().add_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        ))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.runner.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_config_has_correct_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn empty_source_yields_in_memory_defaults() {
        let config = ServerConfig::from_builder(config::Config::builder()).expect("config");
        assert!(config.database_url.is_none());
        assert!(config.reddit.is_none());
        assert!(config.google.is_none());
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
    }

    #[test]
    fn zero_limits_are_rejected() {
        for key in ["runner.call_timeout_seconds", "runner.poll_interval_seconds"] {
            let builder = config::Config::builder()
                .set_override(key, 0)
                .expect("override");

            let err = ServerConfig::from_builder(builder).expect_err("zero rejected");
            let field = key.trim_start_matches("runner.");
            assert!(err.to_string().contains(field), "{err}");
        }
    }

    #[test]
    fn nested_overrides_are_read() {
        let builder = config::Config::builder()
            .set_override("runner.poll_interval_seconds", 15)
            .expect("override")
            .set_override("reddit.client_id", "id")
            .expect("override")
            .set_override("reddit.client_secret", "secret")
            .expect("override");

        let config = ServerConfig::from_builder(builder).expect("config");
        assert_eq!(config.runner.poll_interval_seconds, 15);
        assert_eq!(config.runner.history_limit, 50);
        let reddit = config.reddit.expect("reddit section");
        assert_eq!(reddit.client_id, "id");
        assert!(reddit.user_agent.is_none());
    }
}
