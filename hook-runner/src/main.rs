//! hook-runner - Webhook receiver that runs local scripts per ref.
//!
//! Usage: `hook-runner <CONFIG>`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hookrun::{create_router, AppState, Config};

/// Run local scripts when a webhook event arrives for a configured ref.
#[derive(Parser, Debug)]
#[command(name = "hook-runner", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("hook_runner_starting");

    // Load configuration
    let config = Config::load(&cli.config).context("Failed to load configuration")?;
    let address = config.bind_address();
    info!(
        config = %cli.config.display(),
        address = %address,
        signature_verification = config.signature_enabled(),
        settings = config.settings.len(),
        "config_loaded"
    );

    if !config.signature_enabled() {
        warn!("signature_verification_disabled");
    }

    let state = AppState::new(config);
    info!(refs = state.dispatcher.scripts().len(), "script_table_built");

    let app = create_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {address}"))?;

    let local_addr = listener
        .local_addr()
        .context("Failed to read listener address")?;
    info!(address = %local_addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
