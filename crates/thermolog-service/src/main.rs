//! Thermolog - BLE sensor poller and HTTP API.
//!
//! Run with: `cargo run -p thermolog-service -- --config config.json`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use time::UtcOffset;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use thermolog_core::BleSensor;
use thermolog_service::{AppState, Collector, Config, Retention, api, config};
use thermolog_store::Store;

/// Thermolog - BLE temperature/humidity poller with a read-only HTTP API.
#[derive(Parser, Debug)]
#[command(name = "thermolog")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: config.json next to the executable).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable acquisition and retention (API only mode).
    #[arg(long)]
    no_collector: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging()?;

    // The local offset can only be read reliably while the process is
    // single-threaded.
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!("Could not determine local UTC offset ({}); using UTC", e);
        UtcOffset::UTC
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(run(args, offset))
}

fn init_logging() -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info")
            .add_directive("thermolog=info".parse()?)
            .add_directive("thermolog_service=info".parse()?)
            .add_directive("thermolog_core=info".parse()?)
            .add_directive("thermolog_store=info".parse()?)
            .add_directive("tower_http=debug".parse()?),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn run(args: Args, offset: UtcOffset) -> anyhow::Result<()> {
    // Load configuration
    let config_path = args.config.unwrap_or_else(config::default_config_path);
    info!("Loading configuration from {}", config_path.display());
    let mut config = Config::load(&config_path)?;

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.database_path = db_path;
    }
    config.validate()?;

    // Open the database
    info!("Opening database at {}", config.database_path.display());
    let store = Store::open(&config.database_path)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?
        .with_offset(offset);

    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind))?;

    let state = AppState::new(store, config);
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if args.no_collector {
        info!("Acquisition and retention disabled (API only mode)");
    } else {
        let target = state.config.device_target()?;
        info!(
            "Monitoring {} every {} minute(s)",
            target.address, state.config.poll_interval_minutes
        );

        let sensor = BleSensor::new(target, state.config.acquire_options())
            .await
            .context("Bluetooth is unavailable")?;

        let collector = Collector::new(Arc::clone(&state), Arc::new(sensor));
        tasks.push(supervise(
            "acquisition",
            tokio::spawn(collector.run(shutdown.clone())),
        ));

        let retention = Retention::new(Arc::clone(&state));
        tasks.push(supervise(
            "retention",
            tokio::spawn(retention.run(shutdown.clone())),
        ));
    }

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    // Stop the background tasks whether the server exited cleanly or not.
    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }

    served?;
    info!("Shutdown complete");
    Ok(())
}

/// Log a background task's panic instead of letting it pass silently.
fn supervise(name: &'static str, handle: JoinHandle<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => error!("The {} task panicked: {}", name, e),
            Err(e) => warn!("The {} task was cancelled: {}", name, e),
        }
    })
}

/// Resolve on Ctrl-C, SIGTERM or an internal cancellation.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
        _ = token.cancelled() => {}
    }

    token.cancel();
}
