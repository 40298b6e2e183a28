//! Tally service - event ingestion over HTTP with periodic persistence.
//!
//! Run with: `cargo run -p tally-service`

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use tally_core::SeriesRegistry;
use tally_service::{AppState, Config, api};
use tally_store::Store;

/// Tally service - buffers time series events and syncs them to SQLite.
#[derive(Parser, Debug)]
#[command(name = "tally-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Do not start the background sync scheduler.
    #[arg(long)]
    no_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tally_service=info".parse()?)
                .add_directive("tally_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring default config: {}", e);
            Config::default()
        }),
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.validate()?;

    let store = Store::open(&config.storage.path)
        .with_context(|| format!("opening database {}", config.storage.path.display()))?;
    let registry = SeriesRegistry::load(store, config.sync.registry_options())
        .await
        .context("loading series from the store")?;

    let addr: SocketAddr = config.server.bind.parse()?;
    let flush_on_shutdown = config.sync.flush_on_shutdown;
    let state = AppState::new(registry, config);

    if args.no_sync {
        info!("Background sync disabled");
    } else {
        state.start_scheduler().await;
    }

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state.clone());

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.stop_scheduler().await;
    if flush_on_shutdown {
        info!("Running final sync before exit");
        match state.registry.synchronize().await {
            Ok(report) => info!(
                "Final sync flushed {} series ({} rows)",
                report.flushed_series, report.rows
            ),
            Err(e) => error!("Final sync failed, buffered data is lost: {}", e),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
