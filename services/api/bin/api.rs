//! Main Entrypoint for the Handoff API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the scenario catalogue and stored preferences.
//! 3. Wiring the lifecycle manager to its credential, transport and transcript collaborators.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use handoff_api::{
    config::Config, credential::HttpCredentialProvider, preferences::FilePreferenceStore,
    realtime::OpenAIRealtimeTransport, router::create_router, scenarios::load_registry,
    state::AppState,
};
use handoff_core::{
    event_log::EventCorrelationLog,
    lifecycle::{Collaborators, ConnectionLifecycleManager},
    transcript::Transcript,
};
use parking_lot::RwLock;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Scenarios ---
    let registry = load_registry(config.scenarios_path.as_deref())?;
    let initial_scenario = config
        .default_scenario
        .clone()
        .or_else(|| registry.default_key().map(str::to_string));
    info!(scenarios = ?registry.keys(), "Scenario catalogue ready.");

    // --- 4. Wire the Session Manager ---
    let http = reqwest::Client::new();
    let (notifier, notifications) = mpsc::unbounded_channel();
    let transcript = Arc::new(Transcript::new());
    let collaborators = Collaborators {
        credentials: Arc::new(HttpCredentialProvider::new(
            http.clone(),
            config.credential_url.clone(),
            config.connect_timeout,
        )),
        transport: Arc::new(OpenAIRealtimeTransport::new(
            config.realtime_url.clone(),
            config.realtime_model.clone(),
            config.connect_timeout,
            notifier,
        )),
        transcript: transcript.clone(),
        preferences: Arc::new(FilePreferenceStore::new(config.preferences_path.clone())),
    };
    let manager = Arc::new(ConnectionLifecycleManager::new(
        collaborators,
        Arc::new(RwLock::new(registry)),
        Arc::new(EventCorrelationLog::new()),
    ));

    if let Some(key) = initial_scenario {
        if let Err(e) = manager.select_scenario(&key) {
            warn!(scenario = %key, error = %e, "Configured default scenario is not available");
        }
    }

    let pump = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run_notifications(notifications).await })
    };

    let app_state = Arc::new(AppState {
        manager: manager.clone(),
        transcript,
        http,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.realtime_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    manager.disconnect();
    pump.abort();
    info!("Server has shut down.");
    Ok(())
}
