//! autoflow server.
//!
//! Hosts the engine behind an HTTP API and drives the background workflow
//! runner. State lives in PostgreSQL when a database URL is configured and
//! in memory otherwise.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;

use autoflow_integration::{AdapterError, AdapterRegistry};
use autoflow_services::{GmailAdapter, GmailSettings, RedditAdapter, RedditSettings};
use config::ServerConfig;
use std::sync::Arc;

/// Builds the registry of provider adapters enabled by `config`.
///
/// # Errors
///
/// Returns an error if an adapter's HTTP client cannot be built.
pub fn adapter_registry(config: &ServerConfig) -> Result<AdapterRegistry, AdapterError> {
    let mut registry = AdapterRegistry::new();

    if let Some(reddit) = &config.reddit {
        let mut settings = RedditSettings::new(&reddit.client_id, &reddit.client_secret);
        if let Some(user_agent) = &reddit.user_agent {
            settings.user_agent.clone_from(user_agent);
        }
        settings.request_timeout = config.runner.call_timeout();
        registry.register(Arc::new(RedditAdapter::new(settings)?));
    }

    if let Some(google) = &config.google {
        let mut settings = GmailSettings::new(&google.client_id, &google.client_secret);
        settings.request_timeout = config.runner.call_timeout();
        registry.register(Arc::new(GmailAdapter::new(settings)?));
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GoogleConfig, RedditConfig, RunnerConfig};

    fn server_config() -> ServerConfig {
        ServerConfig {
            database_url: None,
            listen_addr: "127.0.0.1:0".to_string(),
            runner: RunnerConfig::default(),
            reddit: None,
            google: None,
        }
    }

    #[test]
    fn no_provider_sections_means_no_adapters() {
        let registry = adapter_registry(&server_config()).expect("registry");
        assert_eq!(registry.service_names().count(), 0);
    }

    #[test]
    fn configured_providers_are_registered() {
        let mut config = server_config();
        config.reddit = Some(RedditConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            user_agent: Some("test-agent/1.0".to_string()),
        });
        config.google = Some(GoogleConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        });

        let registry = adapter_registry(&config).expect("registry");

        assert_eq!(
            registry.service_names().collect::<Vec<_>>(),
            ["gmail", "reddit"]
        );
        let reddit = registry.get("reddit").expect("reddit").info();
        assert!(reddit.supports_trigger("new_post"));
        assert!(reddit.supports_action("vote"));
    }
}
