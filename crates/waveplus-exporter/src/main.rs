//! Wave Plus exporter - background acquisition and Prometheus endpoint.
//!
//! Run with: `cargo run -p waveplus-exporter`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use waveplus_core::{BtleRadio, Exit};
use waveplus_exporter::{AppState, Collector, Config, api};

/// Wave Plus exporter - BLE acquisition loop and Prometheus metrics.
#[derive(Parser, Debug)]
#[command(name = "waveplus-exporter")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Scan duration in seconds (overrides config).
    #[arg(long)]
    scan_duration: Option<u64>,

    /// Read interval in seconds (overrides config).
    #[arg(long)]
    read_interval: Option<u64>,

    /// Disable the /metrics endpoint (JSON API only).
    #[arg(long)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("waveplus_core=info".parse()?)
                .add_directive("waveplus_exporter=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring unreadable default config: {}", e);
            Config::default()
        }),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(secs) = args.scan_duration {
        config.acquisition.scan_duration_secs = secs;
    }
    if let Some(secs) = args.read_interval {
        config.acquisition.read_interval_secs = secs;
    }
    if args.no_metrics {
        config.server.metrics_enabled = false;
    }
    config.validate()?;

    let addr: SocketAddr = config.server.bind.parse()?;
    let state = AppState::new(config);
    let cancel = CancellationToken::new();

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
        .with_state(Arc::clone(&state));

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_cancel.cancelled_owned())
            .await
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        signal_cancel.cancel();
    });

    let collector = Collector::new(Arc::clone(&state), Arc::new(BtleRadio::new()));
    let exit = collector.run(&cancel).await;
    cancel.cancel();
    server.await??;

    match exit? {
        Exit::Shutdown => {
            info!("Stopped");
            Ok(())
        }
        Exit::WatchdogExpired { silent_for } => {
            error!(
                "No successful read for {:?}, exiting for supervisor restart",
                silent_for
            );
            std::process::exit(1);
        }
    }
}

/// Resolve on Ctrl-C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
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
}
