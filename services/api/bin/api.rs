//! Main Entrypoint for the Callbridge API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the tool registry and the outbound call client.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use callbridge_api::{
    config::Config,
    router::create_router,
    state::AppState,
    tools,
    twilio::{CallInitiator, TwilioClient},
    ws::{observer::ObserverHub, router::CallSlot},
};
use std::{net::SocketAddr, sync::Arc, sync::Mutex};
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

    // --- 3. Initialize Shared Services ---
    let registry = tools::default_registry();
    info!(tool_count = registry.len(), "Tool registry initialized.");

    let dialer: Option<Arc<dyn CallInitiator>> = match config.twilio.clone() {
        Some(twilio) => Some(Arc::new(TwilioClient::new(twilio))),
        None => {
            warn!("Twilio credentials not set; outbound dialing is disabled.");
            None
        }
    };

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        tools: Arc::new(registry),
        observers: ObserverHub::new(),
        calls: CallSlot::new(),
        realtime_control: Arc::new(Mutex::new(None)),
        dialer,
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.realtime_model,
        voice = %config.voice,
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

    info!("Server has shut down.");
    Ok(())
}
