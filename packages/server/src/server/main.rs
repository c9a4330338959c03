// Main entry point for the harvest API server

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester::HealSupervisor;
use server_core::kernel::{
    DevCollector, DevDriverFactory, InMemoryCheckpointStore, InMemoryDedupStore, ServerDeps,
    StaticCredentialResolver,
};
use server_core::server::{build_app, AppState, RequestController};
use server_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,harvester=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting connection harvest API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let harvest_config = config.harvest_config();
    tracing::info!("Configuration loaded");

    // Restart queue: the launcher half goes into the dependency
    // container, the receiver half feeds the heal supervisor.
    let (launcher, heal_rx) = HealSupervisor::channel(harvest_config.supervisor_buffer);

    // Development wiring: synthetic collector, in-memory stores, and an
    // always-healthy driver. Production deployments swap these for the
    // real collaborators.
    let deps = ServerDeps::new(
        Arc::new(DevCollector::new(config.dev_items_per_category)),
        Arc::new(InMemoryDedupStore::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(StaticCredentialResolver),
        Arc::new(launcher),
        Arc::new(DevDriverFactory),
        harvest_config,
    );

    let controller = Arc::new(RequestController::new(deps.clone()));

    // Replacement workers for healed requests run through the same
    // controller as inbound requests.
    let supervisor = HealSupervisor::new(heal_rx, controller.clone());
    tokio::spawn(supervisor.run());

    let app = build_app(
        AppState { deps, controller },
        config.api_bearer_token.clone(),
    );

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
