//! snapval-ia - Item Analysis Microservice
//!
//! **Module Identity:**
//! - Name: snapval-ia (Item Analysis)
//! - Port: 5745
//!
//! Identifies a physical item from a photograph and estimates a resale
//! price from visually ranked marketplace comps. Integrates with the
//! SnapVal front-end via HTTP REST + SSE.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snapval_ia::config::IaConfig;
use snapval_ia::AppState;

/// Command-line arguments for snapval-ia
#[derive(Parser, Debug)]
#[command(name = "snapval-ia")]
#[command(about = "Item Analysis microservice for SnapVal")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SNAPVAL_CONFIG")]
    config: Option<String>,

    /// Port to listen on (overrides configuration)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snapval_ia=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Log build identification immediately after tracing init
    info!(
        "Starting snapval-ia (Item Analysis) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Load configuration: defaults, then TOML, then environment
    let config_path =
        snapval_common::config::resolve_config_file(args.config.as_deref(), "SNAPVAL_CONFIG");
    let mut config = IaConfig::load(config_path.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Wire the service registry and application state
    let state = AppState::from_config(&config);
    info!("Analysis pipeline initialized");

    let app = snapval_ia::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Starting HTTP server on {}", addr);
    info!("Health check: http://127.0.0.1:{}/health", config.server.port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
