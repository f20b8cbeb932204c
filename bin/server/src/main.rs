use autoflow_integration::{
    CredentialStore, DedupLedger, InMemoryCredentialStore, InMemoryDedupLedger,
};
use autoflow_scheduler::PollSchedule;
use autoflow_server::{
    adapter_registry,
    api,
    config::ServerConfig,
    db::{CredentialRepository, ProcessedEventRepository, WorkflowRepository},
    engine::{Engine, EngineSettings},
};
use autoflow_workflow::{InMemoryWorkflowStore, WorkflowStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Stores = (
    Arc<dyn WorkflowStore>,
    Arc<dyn CredentialStore>,
    Arc<dyn DedupLedger>,
);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,autoflow=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let (workflows, credentials, ledger) = stores(&config).await;

    let registry = adapter_registry(&config).expect("failed to build service adapters");
    if registry.service_names().next().is_none() {
        tracing::warn!("No service adapters configured; set REDDIT__* or GOOGLE__* variables");
    }
    for service in registry.service_names() {
        tracing::info!(service, "Registered service adapter");
    }

    let engine = Engine::new(
        registry,
        workflows,
        credentials,
        ledger,
        EngineSettings {
            call_timeout: config.runner.call_timeout(),
            history_limit: config.runner.history_limit,
        },
    );
    engine
        .load_workflows()
        .await
        .expect("failed to load workflows");

    let schedule = PollSchedule::from_secs(config.runner.poll_interval_seconds)
        .expect("invalid RUNNER__POLL_INTERVAL_SECONDS");
    let cancel = CancellationToken::new();
    let runner = engine.start(schedule, cancel.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");
    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, api::router(engine))
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .expect("server error");

    // Let in-flight cycles finish before exiting.
    cancel.cancel();
    if let Err(e) = runner.await {
        tracing::error!(error = %e, "Workflow runner task failed");
    }
    tracing::info!("Shut down");
}

/// Connects the PostgreSQL stores, or falls back to in-memory ones.
async fn stores(config: &ServerConfig) -> Stores {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set; state is kept in memory and lost on exit");
        return (
            Arc::new(InMemoryWorkflowStore::new()),
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryDedupLedger::new()),
        );
    };

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    (
        Arc::new(WorkflowRepository::new(db_pool.clone())),
        Arc::new(CredentialRepository::new(db_pool.clone())),
        Arc::new(ProcessedEventRepository::new(db_pool)),
    )
}

/// Resolves on Ctrl-C or when `cancel` fires.
async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
        }
        () = cancel.cancelled() => {}
    }
}
