//! svbatch-server - batch conversion service
//!
//! Loads `svbatch.toml`, registers the configured command plugins and serves
//! the batch API with SSE progress events.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use svbatch_server::config::ScratchBackend;
use svbatch_server::{build_router, AppState, ServerConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for svbatch-server
#[derive(Parser, Debug)]
#[command(name = "svbatch-server")]
#[command(about = "Batch file-format conversion service")]
#[command(version)]
struct Args {
    /// Config file (overrides SVBATCH_CONFIG and the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5780
    #[arg(short, long, env = "SVBATCH_BIND")]
    bind: Option<String>,

    /// Keep artifacts on disk under this directory instead of in memory
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(dir) = args.scratch_dir {
        config.scratch.backend = ScratchBackend::Disk;
        config.scratch.root = Some(dir);
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting svbatch-server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        formats = config.formats.len(),
        middlewares = config.middlewares.len(),
        "Plugins configured"
    );

    let state = AppState::from_config(&config).context("Failed to initialize engine")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;
    info!("Listening on http://{}", config.server.bind);
    info!("Health check: http://{}/health", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
